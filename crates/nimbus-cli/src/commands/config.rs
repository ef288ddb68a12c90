//! Config command - inspect and edit the configuration file

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;

use super::Completion;
use crate::config::{Config, KEYS};
use crate::output::{ConfigRow, OutputContext};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// List every key that is set
    List,

    /// Print the value of a key
    Get {
        /// Key (see `config keys`)
        key: String,
    },

    /// Set a key
    Set {
        /// Key (see `config keys`)
        key: String,

        /// New value
        value: String,
    },

    /// Unset a key
    Delete {
        /// Key (see `config keys`)
        key: String,
    },

    /// List the keys that can be set
    Keys,
}

pub fn run(
    cmd: &ConfigCommand,
    config: &mut Config,
    path: &Path,
    out: &OutputContext,
) -> Result<Completion> {
    match cmd {
        ConfigCommand::List => {
            let rows: Vec<ConfigRow> = config
                .entries()
                .into_iter()
                .map(|(key, value)| ConfigRow {
                    value: redact(&key, value),
                    key,
                })
                .collect();
            if rows.is_empty() {
                out.info(&format!("Nothing set in {}", path.display()));
                return Ok(Completion::Success);
            }
            out.print(&rows);
        }

        ConfigCommand::Get { key } => match config.get(key)? {
            Some(value) => println!("{value}"),
            None => bail!("{key} is not set"),
        },

        ConfigCommand::Set { key, value } => {
            config.set(key, value)?;
            config.save(path)?;
            out.success(&format!("Set {key} in {}", path.display()));
        }

        ConfigCommand::Delete { key } => {
            if config.delete(key)? {
                config.save(path)?;
                out.success(&format!("Deleted {key} from {}", path.display()));
            } else {
                out.warn(&format!("{key} was not set"));
            }
        }

        ConfigCommand::Keys => {
            for key in KEYS {
                println!("{key}");
            }
            println!("services.<type>.endpoint_url");
            println!("services.<type>.version");
        }
    }

    Ok(Completion::Success)
}

fn redact(key: &str, value: String) -> String {
    if key == "token" {
        "...".to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_redacted() {
        assert_eq!(redact("token", "secret".to_string()), "...");
        assert_eq!(redact("account", "alice".to_string()), "alice");
    }

    #[test]
    fn test_set_saves_and_delete_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let out = OutputContext::new(Default::default(), true, true);
        let mut config = Config::default();

        let set = ConfigCommand::Set {
            key: "account".to_string(),
            value: "alice".to_string(),
        };
        run(&set, &mut config, &path, &out).unwrap();
        let saved = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(saved.account.as_deref(), Some("alice"));

        let delete = ConfigCommand::Delete {
            key: "account".to_string(),
        };
        run(&delete, &mut config, &path, &out).unwrap();
        assert_eq!(Config::load(Some(path.as_path())).unwrap(), Config::default());

        let get = ConfigCommand::Get {
            key: "account".to_string(),
        };
        assert!(run(&get, &mut config, &path, &out).is_err());
    }
}
