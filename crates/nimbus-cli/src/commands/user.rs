//! User command - identity lookups

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use clap::Subcommand;
use serde_json::Value;

use super::Completion;
use crate::context::Session;
use crate::output::{or_dash, UserRow};

#[derive(Subcommand)]
pub enum UserCommand {
    /// Show the user behind the current token
    Info,

    /// Print one field of the current user record (id, name, ...)
    Term {
        /// Field name
        key: String,
    },

    /// List the users authenticated in this session
    List,

    /// Look up display names for user ids
    Names {
        /// User id(s)
        #[arg(required = true)]
        uuids: Vec<String>,
    },

    /// Look up user ids for display names
    Uuids {
        /// Display name(s)
        #[arg(required = true)]
        names: Vec<String>,
    },
}

pub async fn run(cmd: &UserCommand, session: &Session) -> Result<Completion> {
    let identity = session.identity()?;
    let credentials = session.credentials()?;

    match cmd {
        UserCommand::Info => {
            let access = identity.access(&credentials).await?;
            let user = &access.user;
            let mut pairs = vec![
                ("ID".to_string(), user.id.clone()),
                ("Name".to_string(), or_dash(user.name.as_deref())),
                (
                    "Token expires".to_string(),
                    or_dash(access.token.expires.as_deref()),
                ),
            ];
            for (key, value) in &user.extra {
                pairs.push((key.clone(), display_value(value)));
            }
            session.out.print_kv(&pairs);
        }

        UserCommand::Term { key } => match identity.user_term(key, &credentials).await? {
            Some(value) => println!("{}", display_value(&value)),
            None => bail!("User has no field '{key}'"),
        },

        UserCommand::List => {
            identity.access(&credentials).await?;
            let rows: Vec<UserRow> = identity
                .list_users()
                .into_iter()
                .map(|user| UserRow {
                    name: or_dash(user.name.as_deref()),
                    uuid: user.id,
                })
                .collect();
            session.out.print(&rows);
        }

        UserCommand::Names { uuids } => {
            let names = identity.uuids_to_usernames(uuids, &credentials).await?;
            print_users(session, uuids, &names, |uuid, name| (uuid, name));
        }

        UserCommand::Uuids { names } => {
            let uuids = identity.usernames_to_uuids(names, &credentials).await?;
            print_users(session, names, &uuids, |name, uuid| (uuid, name));
        }
    }

    Ok(Completion::Success)
}

/// One row per requested key, in request order; unknown keys are warned about
fn print_users<F>(session: &Session, wanted: &[String], found: &BTreeMap<String, String>, row: F)
where
    F: Fn(String, String) -> (String, String),
{
    let mut rows = Vec::new();
    for key in wanted {
        match found.get(key) {
            Some(value) => {
                let (uuid, name) = row(key.clone(), value.clone());
                rows.push(UserRow { uuid, name });
            }
            None => session.out.warn(&format!("Unknown user: {key}")),
        }
    }
    session.out.print(&rows);
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
