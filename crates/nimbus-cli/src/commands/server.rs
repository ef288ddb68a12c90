//! Server command - virtual machine lifecycle

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use nimbus_client::{CreateServer, MissingAs, RebootType, Server};

use super::wait::{wait_for, WaitSpec};
use super::{timeout_arg, Completion};
use crate::context::Session;
use crate::output::{or_dash, ServerRow};

const ACTIVE: &str = "ACTIVE";
const STOPPED: &str = "STOPPED";
const DELETED: &str = "DELETED";

#[derive(Subcommand)]
pub enum ServerCommand {
    /// List servers
    List {
        /// Fetch full details for each server
        #[arg(short, long)]
        detail: bool,
    },

    /// Show server details
    Info {
        /// Server ID
        id: String,
    },

    /// Create a server
    Create {
        /// Server name
        #[arg(long)]
        name: String,

        /// Flavor ID
        #[arg(long)]
        flavor: String,

        /// Image ID
        #[arg(long)]
        image: String,

        /// Metadata entries (KEY=VALUE)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Delete server(s)
    Delete {
        /// Server ID(s)
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Reboot a server
    Reboot {
        /// Server ID
        id: String,

        /// Hard reboot
        #[arg(long)]
        hard: bool,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Start a stopped server
    Start {
        /// Server ID
        id: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Shut a server down
    Shutdown {
        /// Server ID
        id: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Wait for server(s) to reach a status
    Wait {
        /// Server ID(s)
        #[arg(required = true)]
        ids: Vec<String>,

        /// Status to wait for
        #[arg(long, default_value = ACTIVE)]
        state: String,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

/// `--wait` and `--timeout` for mutating commands
#[derive(Args, Clone, Copy, Default)]
pub struct WaitArgs {
    /// Wait until the operation has completed
    #[arg(short, long)]
    pub wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, requires = "wait")]
    pub timeout: Option<u64>,
}

pub async fn run(cmd: &ServerCommand, session: &Session) -> Result<Completion> {
    let compute = session.compute().await?;

    match cmd {
        ServerCommand::List { detail } => {
            let servers = compute.list_servers(*detail).await?;
            if servers.is_empty() {
                session.out.info("No servers found");
                return Ok(Completion::Success);
            }
            let rows: Vec<ServerRow> = servers.iter().map(server_row).collect();
            session.out.print(&rows);
        }

        ServerCommand::Info { id } => {
            let server = compute.get_server(id).await?;
            session.out.print_kv(&server_details(&server));
        }

        ServerCommand::Create {
            name,
            flavor,
            image,
            metadata,
            wait,
        } => {
            let params = CreateServer {
                name: name.clone(),
                flavor_id: flavor.clone(),
                image_id: image.clone(),
                metadata: parse_pairs(metadata)?,
            };
            let server = compute.create_server(&params).await?;
            session
                .out
                .success(&format!("Server {} ({}) is being built", server.id, server.name));
            if let Some(password) = &server.admin_pass {
                session.out.info(&format!("Admin password: {password}"));
            }
            if wait.wait {
                let spec = WaitSpec::until(ACTIVE).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &compute, &[server.id], spec).await;
            }
        }

        ServerCommand::Delete { ids, wait } => {
            for id in ids {
                compute.delete_server(id).await?;
                session.out.success(&format!("Server {id} is being deleted"));
            }
            if wait.wait {
                let source = MissingAs::new(compute, DELETED);
                let spec = WaitSpec::until(DELETED).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &source, ids, spec).await;
            }
        }

        ServerCommand::Reboot { id, hard, wait } => {
            let reboot = if *hard { RebootType::Hard } else { RebootType::Soft };
            compute.reboot_server(id, reboot).await?;
            session.out.success(&format!("Server {id} is rebooting"));
            if wait.wait {
                return wait_one(session, &compute, id, ACTIVE, wait).await;
            }
        }

        ServerCommand::Start { id, wait } => {
            compute.start_server(id).await?;
            session.out.success(&format!("Server {id} is starting"));
            if wait.wait {
                return wait_one(session, &compute, id, ACTIVE, wait).await;
            }
        }

        ServerCommand::Shutdown { id, wait } => {
            compute.shutdown_server(id).await?;
            session.out.success(&format!("Server {id} is shutting down"));
            if wait.wait {
                return wait_one(session, &compute, id, STOPPED, wait).await;
            }
        }

        ServerCommand::Wait {
            ids,
            state,
            timeout,
        } => {
            let spec = WaitSpec::until(state).with_timeout(timeout_arg(*timeout));
            return wait_for(session, &compute, ids, spec).await;
        }
    }

    Ok(Completion::Success)
}

async fn wait_one<S>(
    session: &Session,
    source: &S,
    id: &str,
    target: &str,
    wait: &WaitArgs,
) -> Result<Completion>
where
    S: nimbus_client::StatusSource,
{
    let spec = WaitSpec::until(target).with_timeout(timeout_arg(wait.timeout));
    wait_for(session, source, &[id.to_string()], spec).await
}

fn server_row(server: &Server) -> ServerRow {
    ServerRow {
        id: server.id.clone(),
        name: server.name.clone(),
        status: or_dash(server.status.as_deref()),
        flavor: or_dash(server.flavor.as_ref().map(|f| &f.id)),
        image: or_dash(server.image.as_ref().map(|i| &i.id)),
    }
}

fn server_details(server: &Server) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("ID".to_string(), server.id.clone()),
        ("Name".to_string(), server.name.clone()),
        ("Status".to_string(), or_dash(server.status.as_deref())),
        ("Progress".to_string(), or_dash(server.progress)),
        (
            "Flavor".to_string(),
            or_dash(server.flavor.as_ref().map(|f| &f.id)),
        ),
        (
            "Image".to_string(),
            or_dash(server.image.as_ref().map(|i| &i.id)),
        ),
        ("Created".to_string(), or_dash(server.created.as_deref())),
        ("Updated".to_string(), or_dash(server.updated.as_deref())),
    ];
    for (key, value) in &server.metadata {
        pairs.push((format!("meta.{key}"), value.clone()));
    }
    pairs
}

/// Parse `KEY=VALUE` arguments
pub(crate) fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected KEY=VALUE, got '{pair}'");
        };
        if key.is_empty() {
            bail!("Empty key in '{pair}'");
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["os=debian".to_string(), "note=a=b".to_string()]).unwrap();
        assert_eq!(pairs["os"], "debian");
        assert_eq!(pairs["note"], "a=b");

        assert!(parse_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_pairs(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_server_row_fills_gaps() {
        let server: Server = serde_json::from_str(r#"{"id": 7, "name": "web"}"#).unwrap();
        let row = server_row(&server);
        assert_eq!(row.id, "7");
        assert_eq!(row.status, "-");
        assert_eq!(row.flavor, "-");
    }
}
