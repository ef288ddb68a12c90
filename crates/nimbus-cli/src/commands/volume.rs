//! Volume command - block storage

use anyhow::Result;
use clap::Subcommand;
use nimbus_client::{MissingAs, Volume};

use super::server::WaitArgs;
use super::wait::{wait_for, WaitSpec};
use super::{timeout_arg, Completion};
use crate::context::Session;
use crate::output::{or_dash, VolumeRow};

const AVAILABLE: &str = "AVAILABLE";
const DELETED: &str = "DELETED";

#[derive(Subcommand)]
pub enum VolumeCommand {
    /// List volumes
    List {
        /// Fetch full details for each volume
        #[arg(short, long)]
        detail: bool,
    },

    /// Show volume details
    Info {
        /// Volume ID
        id: String,
    },

    /// Create a volume
    Create {
        /// Size in GiB
        #[arg(long)]
        size: u64,

        /// Volume name
        #[arg(long)]
        name: String,

        /// Attach to this server
        #[arg(long)]
        server: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Delete volume(s)
    Delete {
        /// Volume ID(s)
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Wait for volume(s) to reach a status
    Wait {
        /// Volume ID(s)
        #[arg(required = true)]
        ids: Vec<String>,

        /// Status to wait for
        #[arg(long, default_value = AVAILABLE)]
        state: String,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

pub async fn run(cmd: &VolumeCommand, session: &Session) -> Result<Completion> {
    let volumes = session.volume().await?;

    match cmd {
        VolumeCommand::List { detail } => {
            let list = volumes.list_volumes(*detail).await?;
            if list.is_empty() {
                session.out.info("No volumes found");
                return Ok(Completion::Success);
            }
            let rows: Vec<VolumeRow> = list.into_iter().map(volume_row).collect();
            session.out.print(&rows);
        }

        VolumeCommand::Info { id } => {
            let volume = volumes.get_volume(id).await?;
            session.out.print_kv(&[
                ("ID".to_string(), volume.id.clone()),
                ("Name".to_string(), or_dash(volume.name.as_deref())),
                ("Status".to_string(), or_dash(volume.status.as_deref())),
                ("Size (GiB)".to_string(), volume.size.to_string()),
                ("Server".to_string(), or_dash(volume.server_id.as_deref())),
                ("Created".to_string(), or_dash(volume.created_at.as_deref())),
            ]);
        }

        VolumeCommand::Create {
            size,
            name,
            server,
            wait,
        } => {
            let volume = volumes
                .create_volume(*size, name, server.as_deref())
                .await?;
            session
                .out
                .success(&format!("Volume {} ({} GiB) is being created", volume.id, size));
            if wait.wait {
                let spec = WaitSpec::until(AVAILABLE).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &volumes, &[volume.id], spec).await;
            }
        }

        VolumeCommand::Delete { ids, wait } => {
            for id in ids {
                volumes.delete_volume(id).await?;
                session.out.success(&format!("Volume {id} is being deleted"));
            }
            if wait.wait {
                let source = MissingAs::new(volumes, DELETED);
                let spec = WaitSpec::until(DELETED).with_timeout(timeout_arg(wait.timeout));
                return wait_for(session, &source, ids, spec).await;
            }
        }

        VolumeCommand::Wait {
            ids,
            state,
            timeout,
        } => {
            let spec = WaitSpec::until(state).with_timeout(timeout_arg(*timeout));
            return wait_for(session, &volumes, ids, spec).await;
        }
    }

    Ok(Completion::Success)
}

fn volume_row(volume: Volume) -> VolumeRow {
    VolumeRow {
        id: volume.id,
        name: or_dash(volume.name),
        status: or_dash(volume.status),
        size: volume.size,
        server: or_dash(volume.server_id),
    }
}
