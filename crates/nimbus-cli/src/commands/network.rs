//! Network command - virtual networks

use anyhow::Result;
use clap::Subcommand;
use nimbus_client::MissingAs;

use super::server::WaitArgs;
use super::wait::{wait_for, WaitSpec};
use super::{timeout_arg, Completion};
use crate::context::Session;
use crate::output::{or_dash, NetworkRow};

const ACTIVE: &str = "ACTIVE";
const DELETED: &str = "DELETED";

#[derive(Subcommand)]
pub enum NetworkCommand {
    /// List networks
    List,

    /// Show network details
    Info {
        /// Network ID
        id: String,
    },

    /// Create a network
    Create {
        /// Network name
        #[arg(long)]
        name: String,

        /// Network type (e.g. MAC_FILTERED, IP_LESS_ROUTED)
        #[arg(long = "type")]
        network_type: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Delete network(s)
    Delete {
        /// Network ID(s)
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Wait for network(s) to reach a status
    Wait {
        /// Network ID(s)
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

pub async fn run(cmd: &NetworkCommand, session: &Session) -> Result<Completion> {
    let networks = session.network().await?;

    match cmd {
        NetworkCommand::List => {
            let list = networks.list_networks().await?;
            if list.is_empty() {
                session.out.info("No networks found");
                return Ok(Completion::Success);
            }
            let rows: Vec<NetworkRow> = list
                .into_iter()
                .map(|n| NetworkRow {
                    id: n.id,
                    name: n.name,
                    status: or_dash(n.status),
                    network_type: or_dash(n.network_type),
                    shared: n.shared,
                })
                .collect();
            session.out.print(&rows);
        }

        NetworkCommand::Info { id } => {
            let network = networks.get_network(id).await?;
            let subnets = if network.subnets.is_empty() {
                "-".to_string()
            } else {
                network.subnets.join(", ")
            };
            session.out.print_kv(&[
                ("ID".to_string(), network.id.clone()),
                ("Name".to_string(), network.name.clone()),
                ("Status".to_string(), or_dash(network.status.as_deref())),
                ("Type".to_string(), or_dash(network.network_type.as_deref())),
                ("Shared".to_string(), network.shared.to_string()),
                ("Subnets".to_string(), subnets),
            ]);
        }

        NetworkCommand::Create {
            name,
            network_type,
            wait,
        } => {
            let network = networks
                .create_network(name, network_type.as_deref())
                .await?;
            session
                .out
                .success(&format!("Network {} ({}) is being created", network.id, network.name));
            if wait.wait {
                let spec = WaitSpec::until(ACTIVE).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &networks, &[network.id], spec).await;
            }
        }

        NetworkCommand::Delete { ids, wait } => {
            for id in ids {
                networks.delete_network(id).await?;
                session.out.success(&format!("Network {id} is being deleted"));
            }
            if wait.wait {
                let source = MissingAs::new(networks, DELETED);
                let spec = WaitSpec::until(DELETED).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &source, ids, spec).await;
            }
        }

        NetworkCommand::Wait {
            ids,
            state,
            timeout,
        } => {
            let spec = WaitSpec::until(state).with_timeout(timeout_arg(*timeout));
            return wait_for(session, &networks, ids, spec).await;
        }
    }

    Ok(Completion::Success)
}
