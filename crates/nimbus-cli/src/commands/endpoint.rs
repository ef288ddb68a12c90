//! Endpoint command - service catalog and resolution

use anyhow::{Context, Result};
use clap::Subcommand;
use nimbus_client::ServiceType;

use super::Completion;
use crate::context::Session;
use crate::output::{or_dash, EndpointRow};

#[derive(Subcommand)]
pub enum EndpointCommand {
    /// List catalog endpoints and configured overrides
    List,

    /// Show where requests for a service will go
    Show {
        /// Service type (compute, volume, network, object-store, identity)
        service: String,
    },
}

pub async fn run(cmd: &EndpointCommand, session: &Session) -> Result<Completion> {
    match cmd {
        EndpointCommand::List => {
            let mut rows = Vec::new();

            if session.settings.auth_url.is_some() {
                let credentials = session.credentials()?;
                let catalog = session.identity()?.service_catalog(&credentials).await?;
                for service in catalog {
                    for endpoint in service.endpoints {
                        rows.push(EndpointRow {
                            service: service.service_type.clone(),
                            version: or_dash(endpoint.version_id),
                            url: endpoint.public_url,
                        });
                    }
                }
            }

            let mut overrides: Vec<_> = session.settings.services.iter().collect();
            overrides.sort_by_key(|(service_type, _)| **service_type);
            for (service_type, service) in overrides {
                rows.push(EndpointRow {
                    service: format!("{service_type} (override)"),
                    version: or_dash(service.version.as_deref()),
                    url: or_dash(service.endpoint_url.as_ref()),
                });
            }

            if rows.is_empty() {
                session
                    .out
                    .info("No endpoints: configure auth_url or services.<type>.endpoint_url");
                return Ok(Completion::Success);
            }
            session.out.print(&rows);
        }

        EndpointCommand::Show { service } => {
            let service_type: ServiceType = service
                .parse()
                .with_context(|| format!("Unknown service '{service}'"))?;
            let credentials = session.credentials()?;
            let endpoint = session
                .resolver()
                .resolve(service_type, &credentials)
                .await?;
            session.out.print_kv(&[
                ("Service".to_string(), endpoint.service_type.to_string()),
                ("Version".to_string(), or_dash(endpoint.version.as_deref())),
                ("URL".to_string(), endpoint.endpoint_url().to_string()),
            ]);
        }
    }

    Ok(Completion::Success)
}
