//! Output formatting for nimbus (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    let table = Table::new(data).to_string();
                    println!("{}", table);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => {
                print!("{}", to_csv(data));
            }
        }
    }

    /// Print key-value pairs (for info commands)
    pub fn print_kv(&self, pairs: &[(String, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let keys: Vec<String> = pairs.iter().map(|(k, _)| escape_csv(k)).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Render rows as CSV, header first
fn to_csv<T: Serialize>(data: &[T]) -> String {
    let Some(first) = data.first() else {
        return String::new();
    };

    let mut out = String::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(first) {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        out.push_str(&headers.join(","));
        out.push('\n');

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                serde_json::Value::Null => String::new(),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                out.push_str(&values.join(","));
                out.push('\n');
            }
        }
    }
    out
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render an optional value for a table cell
pub fn or_dash(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

// =============================================================================
// Display types for various commands
// =============================================================================

#[derive(Debug, Tabled, Serialize)]
pub struct ServerRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Flavor")]
    pub flavor: String,
    #[tabled(rename = "Image")]
    pub image: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct FlavorRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "RAM (MiB)")]
    pub ram: String,
    #[tabled(rename = "vCPUs")]
    pub vcpus: String,
    #[tabled(rename = "Disk (GiB)")]
    pub disk: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct VolumeRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Size (GiB)")]
    pub size: u64,
    #[tabled(rename = "Server")]
    pub server: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct NetworkRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Type")]
    pub network_type: String,
    #[tabled(rename = "Shared")]
    pub shared: bool,
}

#[derive(Debug, Tabled, Serialize)]
pub struct ContainerRow {
    #[tabled(rename = "Container")]
    pub name: String,
    #[tabled(rename = "Objects")]
    pub count: u64,
    #[tabled(rename = "Bytes")]
    pub bytes: u64,
}

#[derive(Debug, Tabled, Serialize)]
pub struct ObjectRow {
    #[tabled(rename = "Object")]
    pub name: String,
    #[tabled(rename = "Bytes")]
    pub bytes: u64,
    #[tabled(rename = "Type")]
    pub content_type: String,
    #[tabled(rename = "Modified")]
    pub last_modified: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct UserRow {
    #[tabled(rename = "UUID")]
    pub uuid: String,
    #[tabled(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct EndpointRow {
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Version")]
    pub version: String,
    #[tabled(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// One finished wait
#[derive(Debug, Tabled, Serialize)]
pub struct WaitRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Polls")]
    pub polls: u32,
    #[tabled(rename = "Elapsed (s)")]
    pub elapsed_secs: u64,
}
