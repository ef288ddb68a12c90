//! Flavor command - hardware templates

use anyhow::Result;
use clap::Subcommand;

use super::Completion;
use crate::context::Session;
use crate::output::{or_dash, FlavorRow};

#[derive(Subcommand)]
pub enum FlavorCommand {
    /// List flavors
    List {
        /// Include RAM, CPU and disk sizes
        #[arg(short, long)]
        detail: bool,
    },
}

pub async fn run(cmd: &FlavorCommand, session: &Session) -> Result<Completion> {
    let compute = session.compute().await?;

    match cmd {
        FlavorCommand::List { detail } => {
            let flavors = compute.list_flavors(*detail).await?;
            if flavors.is_empty() {
                session.out.info("No flavors found");
                return Ok(Completion::Success);
            }
            let rows: Vec<FlavorRow> = flavors
                .into_iter()
                .map(|f| FlavorRow {
                    id: f.id,
                    name: f.name,
                    ram: or_dash(f.ram),
                    vcpus: or_dash(f.vcpus),
                    disk: or_dash(f.disk),
                })
                .collect();
            session.out.print(&rows);
        }
    }

    Ok(Completion::Success)
}
