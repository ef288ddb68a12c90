//! Configuration file handling for nimbus
//!
//! Every key is optional. A key that is absent from the file falls back to a
//! computed default at merge time, and defaults are never written back.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use nimbus_client::{RetryPolicy, ServiceOverride, ServiceType, WaitOptions};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::output::OutputFormat;

/// Plain keys accepted by `config get/set/delete`
pub const KEYS: [&str; 10] = [
    "auth_url",
    "token",
    "account",
    "verify_tls",
    "poll_interval_secs",
    "wait_timeout_secs",
    "retries",
    "retry_grace_secs",
    "output",
    "no_color",
];

/// Configuration for the CLI tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity service URL
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Storage account; defaults to the authenticated user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_grace_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_color: Option<bool>,
    /// Per-service endpoint overrides, keyed by service type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceOverride>,
}

impl Config {
    /// Load configuration from `path`, or the default location
    ///
    /// A missing file is an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write the keys that are set to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("nimbus");

        Ok(config_dir.join("config.toml"))
    }

    /// Value of `key`, if set
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some((service, field)) = service_key(key)? {
            let entry = self.services.get(&service);
            return Ok(match field {
                ServiceField::EndpointUrl => {
                    entry.and_then(|s| s.endpoint_url.as_ref()).map(Url::to_string)
                }
                ServiceField::Version => entry.and_then(|s| s.version.clone()),
            });
        }

        let value = match canonical(key)? {
            "auth_url" => self.auth_url.clone(),
            "token" => self.token.clone(),
            "account" => self.account.clone(),
            "verify_tls" => self.verify_tls.map(|v| v.to_string()),
            "poll_interval_secs" => self.poll_interval_secs.map(|v| v.to_string()),
            "wait_timeout_secs" => self.wait_timeout_secs.map(|v| v.to_string()),
            "retries" => self.retries.map(|v| v.to_string()),
            "retry_grace_secs" => self.retry_grace_secs.map(|v| v.to_string()),
            "output" => self.output.clone(),
            "no_color" => self.no_color.map(|v| v.to_string()),
            _ => None,
        };
        Ok(value)
    }

    /// Set `key` to `value`, validating it first
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some((service, field)) = service_key(key)? {
            match field {
                ServiceField::EndpointUrl => {
                    let url = Url::parse(value)
                        .with_context(|| format!("Invalid URL for {key}: {value}"))?;
                    self.services.entry(service).or_default().endpoint_url = Some(url);
                }
                ServiceField::Version => {
                    self.services.entry(service).or_default().version = Some(value.to_string());
                }
            }
            return Ok(());
        }

        match canonical(key)? {
            "auth_url" => {
                Url::parse(value).with_context(|| format!("Invalid URL: {value}"))?;
                self.auth_url = Some(value.to_string());
            }
            "token" => self.token = Some(value.to_string()),
            "account" => self.account = Some(value.to_string()),
            "verify_tls" => self.verify_tls = Some(parse(key, value)?),
            "poll_interval_secs" => self.poll_interval_secs = Some(parse(key, value)?),
            "wait_timeout_secs" => self.wait_timeout_secs = Some(parse(key, value)?),
            "retries" => self.retries = Some(parse(key, value)?),
            "retry_grace_secs" => self.retry_grace_secs = Some(parse(key, value)?),
            "output" => {
                OutputFormat::from_str(value, true)
                    .map_err(|e| anyhow::anyhow!("Invalid output format {value:?}: {e}"))?;
                self.output = Some(value.to_ascii_lowercase());
            }
            "no_color" => self.no_color = Some(parse(key, value)?),
            _ => {}
        }
        Ok(())
    }

    /// Unset `key`; returns whether it was set
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        if let Some((service, field)) = service_key(key)? {
            let Some(entry) = self.services.get_mut(&service) else {
                return Ok(false);
            };
            let removed = match field {
                ServiceField::EndpointUrl => entry.endpoint_url.take().is_some(),
                ServiceField::Version => entry.version.take().is_some(),
            };
            if entry.endpoint_url.is_none() && entry.version.is_none() {
                self.services.remove(&service);
            }
            return Ok(removed);
        }

        let removed = match canonical(key)? {
            "auth_url" => self.auth_url.take().is_some(),
            "token" => self.token.take().is_some(),
            "account" => self.account.take().is_some(),
            "verify_tls" => self.verify_tls.take().is_some(),
            "poll_interval_secs" => self.poll_interval_secs.take().is_some(),
            "wait_timeout_secs" => self.wait_timeout_secs.take().is_some(),
            "retries" => self.retries.take().is_some(),
            "retry_grace_secs" => self.retry_grace_secs.take().is_some(),
            "output" => self.output.take().is_some(),
            "no_color" => self.no_color.take().is_some(),
            _ => false,
        };
        Ok(removed)
    }

    /// Every key that is set, with its value
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = KEYS
            .iter()
            .filter_map(|key| {
                self.get(key)
                    .ok()
                    .flatten()
                    .map(|value| (key.to_string(), value))
            })
            .collect();
        for (service, entry) in &self.services {
            if let Some(url) = &entry.endpoint_url {
                entries.push((format!("services.{service}.endpoint_url"), url.to_string()));
            }
            if let Some(version) = &entry.version {
                entries.push((format!("services.{service}.version"), version.clone()));
            }
        }
        entries
    }

    /// Merge command-line arguments over config file values
    pub fn merge_with_args(&self, args: &ArgOverrides<'_>) -> Result<Settings> {
        let auth_url = args
            .auth_url
            .map(String::from)
            .or_else(|| self.auth_url.clone())
            .map(|u| Url::parse(&u).with_context(|| format!("Invalid auth URL: {u}")))
            .transpose()?;

        let output = match (args.output, &self.output) {
            (Some(format), _) => format,
            (None, Some(name)) => OutputFormat::from_str(name, true)
                .map_err(|e| anyhow::anyhow!("Invalid output format {name:?} in config: {e}"))?,
            (None, None) => OutputFormat::default(),
        };

        let defaults = WaitOptions::default();
        let retries = self.retries.unwrap_or(defaults.retry.max_attempts);
        let wait = WaitOptions {
            poll_interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            timeout: self
                .wait_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry: RetryPolicy::attempts(retries),
            retry_grace: self
                .retry_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_grace),
        };

        let mut services = HashMap::new();
        for (name, entry) in &self.services {
            let service_type: ServiceType = name
                .parse()
                .with_context(|| format!("Invalid [services.{name}] section"))?;
            services.insert(service_type, entry.clone());
        }

        Ok(Settings {
            auth_url,
            token: args.token.map(String::from).or_else(|| self.token.clone()),
            account: self.account.clone(),
            verify_tls: !args.insecure && self.verify_tls.unwrap_or(true),
            output,
            no_color: args.no_color || self.no_color.unwrap_or(false),
            retry: RetryPolicy::attempts(retries),
            wait,
            services,
        })
    }
}

/// Values given on the command line (or through their environment variables)
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgOverrides<'a> {
    pub auth_url: Option<&'a str>,
    pub token: Option<&'a str>,
    pub output: Option<OutputFormat>,
    pub no_color: bool,
    pub insecure: bool,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct Settings {
    pub auth_url: Option<Url>,
    pub token: Option<String>,
    pub account: Option<String>,
    pub verify_tls: bool,
    pub output: OutputFormat,
    pub no_color: bool,
    /// Retries for idempotent requests
    pub retry: RetryPolicy,
    pub wait: WaitOptions,
    pub services: HashMap<ServiceType, ServiceOverride>,
}

enum ServiceField {
    EndpointUrl,
    Version,
}

/// Split `services.<type>.<field>`; `None` for plain keys
fn service_key(key: &str) -> Result<Option<(String, ServiceField)>> {
    let Some(rest) = key.strip_prefix("services.") else {
        return Ok(None);
    };
    let Some((service, field)) = rest.rsplit_once('.') else {
        bail!("Expected services.<type>.<field>, got {key}");
    };
    let service_type: ServiceType = service.parse()?;
    let field = match field {
        "endpoint_url" | "base_url" => ServiceField::EndpointUrl,
        "version" => ServiceField::Version,
        other => bail!("Unknown service setting: {other}"),
    };
    Ok(Some((service_type.as_str().to_string(), field)))
}

fn canonical(key: &str) -> Result<&'static str> {
    let key = if key == "url" { "auth_url" } else { key };
    KEYS.iter()
        .find(|k| **k == key)
        .copied()
        .with_context(|| format!("Unknown config key: {key}"))
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let mut config = Config::default();
        config.set("url", "https://cloud.example.org/identity/v2.0").unwrap();
        config.set("retries", "5").unwrap();
        config.set("output", "JSON").unwrap();

        assert_eq!(
            config.get("auth_url").unwrap().as_deref(),
            Some("https://cloud.example.org/identity/v2.0")
        );
        assert_eq!(config.get("retries").unwrap().as_deref(), Some("5"));
        assert_eq!(config.get("output").unwrap().as_deref(), Some("json"));
        assert_eq!(config.get("token").unwrap(), None);

        assert!(config.delete("retries").unwrap());
        assert!(!config.delete("retries").unwrap());
        assert_eq!(config.get("retries").unwrap(), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        assert!(config.set("retries", "many").is_err());
        assert!(config.set("verify_tls", "maybe").is_err());
        assert!(config.set("auth_url", "not a url").is_err());
        assert!(config.set("output", "xml").is_err());
        assert!(config.set("colour", "red").is_err());
        assert!(config.get("colour").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_service_keys() {
        let mut config = Config::default();
        config
            .set("services.cyclades.endpoint_url", "https://compute.example.org/v2/")
            .unwrap();
        config.set("services.compute.version", "v2.0").unwrap();

        assert_eq!(
            config.get("services.compute.base_url").unwrap().as_deref(),
            Some("https://compute.example.org/v2/")
        );
        let keys: Vec<String> = config.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            ["services.compute.endpoint_url", "services.compute.version"]
        );

        assert!(config.delete("services.compute.endpoint_url").unwrap());
        assert!(config.delete("services.compute.version").unwrap());
        assert!(config.services.is_empty());

        assert!(config.set("services.image.version", "v1").is_err());
        assert!(config.set("services.compute.colour", "red").is_err());
    }

    #[test]
    fn test_save_writes_only_set_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("token", "secret").unwrap();
        config
            .set("services.object-store.endpoint_url", "https://files.example.org/v1")
            .unwrap();
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("token = \"secret\""));
        assert!(content.contains("[services.object-store]"));
        assert!(!content.contains("retries"));
        assert!(!content.contains("verify_tls"));

        assert_eq!(Config::load(Some(path.as_path())).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_legacy_aliases_are_read() {
        let config: Config = toml::from_str(
            r#"
            url = "https://cloud.example.org/identity/v2.0"

            [services.compute]
            base_url = "https://compute.example.org/v2/"
            "#,
        )
        .unwrap();
        assert!(config.auth_url.is_some());
        assert!(config.services["compute"].endpoint_url.is_some());

        // Written back under the current names
        let written = toml::to_string(&config).unwrap();
        assert!(written.contains("auth_url"));
        assert!(written.contains("endpoint_url"));
    }

    #[test]
    fn test_merge_precedence() {
        let mut config = Config::default();
        config.set("auth_url", "https://file.example.org/").unwrap();
        config.set("token", "file-token").unwrap();
        config.set("output", "csv").unwrap();
        config.set("poll_interval_secs", "2").unwrap();

        let merged = config.merge_with_args(&ArgOverrides::default()).unwrap();
        assert_eq!(merged.auth_url.unwrap().host_str(), Some("file.example.org"));
        assert_eq!(merged.token.as_deref(), Some("file-token"));
        assert_eq!(merged.output, OutputFormat::Csv);
        assert_eq!(merged.wait.poll_interval, Duration::from_secs(2));
        assert_eq!(merged.wait.timeout, Duration::from_secs(300));
        assert!(merged.verify_tls);

        let merged = config
            .merge_with_args(&ArgOverrides {
                auth_url: Some("https://flag.example.org/"),
                token: Some("flag-token"),
                output: Some(OutputFormat::Json),
                no_color: true,
                insecure: true,
            })
            .unwrap();
        assert_eq!(merged.auth_url.unwrap().host_str(), Some("flag.example.org"));
        assert_eq!(merged.token.as_deref(), Some("flag-token"));
        assert_eq!(merged.output, OutputFormat::Json);
        assert!(merged.no_color);
        assert!(!merged.verify_tls);
    }

    #[test]
    fn test_merge_defaults() {
        let merged = Config::default()
            .merge_with_args(&ArgOverrides::default())
            .unwrap();
        assert!(merged.auth_url.is_none());
        assert_eq!(merged.output, OutputFormat::Table);
        assert_eq!(merged.wait, WaitOptions::default());
        assert_eq!(merged.retry.max_attempts, 3);
        assert!(merged.services.is_empty());
    }
}
