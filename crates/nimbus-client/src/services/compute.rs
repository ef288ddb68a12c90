//! Compute service: servers and flavors

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{snapshot_from_envelope, string_or_number, ResourceRef, ServiceClient};
use crate::error::Result;
use crate::wait::{StatusSnapshot, StatusSource};

/// A virtual server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub flavor: Option<ResourceRef>,
    #[serde(default)]
    pub image: Option<ResourceRef>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    /// Only returned on creation
    #[serde(default, rename = "adminPass", skip_serializing_if = "Option::is_none")]
    pub admin_pass: Option<String>,
}

/// Hardware template for servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flavor {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ram: Option<u64>,
    #[serde(default)]
    pub vcpus: Option<u32>,
    #[serde(default)]
    pub disk: Option<u64>,
}

/// Parameters for a new server
#[derive(Debug, Clone, Default)]
pub struct CreateServer {
    pub name: String,
    pub flavor_id: String,
    pub image_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<Flavor>,
}

/// Reboot strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootType {
    Soft,
    Hard,
}

impl RebootType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "SOFT",
            Self::Hard => "HARD",
        }
    }
}

/// Compute service client
#[derive(Debug, Clone)]
pub struct ComputeClient {
    service: ServiceClient,
}

impl ComputeClient {
    pub fn new(service: ServiceClient) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &ServiceClient {
        &self.service
    }

    /// List servers; `detail` includes status and metadata
    #[instrument(skip(self))]
    pub async fn list_servers(&self, detail: bool) -> Result<Vec<Server>> {
        let segments: &[&str] = if detail {
            &["servers", "detail"]
        } else {
            &["servers"]
        };
        let list: ServerList = self.service.get_json(segments, &[]).await?;
        debug!("Listed {} servers", list.servers.len());
        Ok(list.servers)
    }

    #[instrument(skip(self))]
    pub async fn get_server(&self, server_id: &str) -> Result<Server> {
        let envelope: ServerEnvelope = self.service.get_json(&["servers", server_id], &[]).await?;
        Ok(envelope.server)
    }

    /// Request a new server; it starts out building
    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn create_server(&self, params: &CreateServer) -> Result<Server> {
        let body = json!({
            "server": {
                "name": params.name,
                "flavorRef": params.flavor_id,
                "imageRef": params.image_id,
                "metadata": params.metadata,
            }
        });
        let response = self
            .service
            .post_json(&["servers"], &body, &[200, 202])
            .await?;
        let envelope: ServerEnvelope = response.json()?;
        info!("Server {} requested", envelope.server.id);
        Ok(envelope.server)
    }

    #[instrument(skip(self))]
    pub async fn delete_server(&self, server_id: &str) -> Result<()> {
        info!("Deleting server {}", server_id);
        self.service.delete(&["servers", server_id], &[202, 204]).await
    }

    #[instrument(skip(self))]
    pub async fn reboot_server(&self, server_id: &str, reboot: RebootType) -> Result<()> {
        self.action(server_id, json!({ "reboot": { "type": reboot.as_str() } }))
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({ "start": {} })).await
    }

    #[instrument(skip(self))]
    pub async fn shutdown_server(&self, server_id: &str) -> Result<()> {
        self.action(server_id, json!({ "shutdown": {} })).await
    }

    async fn action(&self, server_id: &str, body: serde_json::Value) -> Result<()> {
        info!("Server {} action {}", server_id, body);
        self.service
            .post_json(&["servers", server_id, "action"], &body, &[200, 202, 204])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_flavors(&self, detail: bool) -> Result<Vec<Flavor>> {
        let segments: &[&str] = if detail {
            &["flavors", "detail"]
        } else {
            &["flavors"]
        };
        let list: FlavorList = self.service.get_json(segments, &[]).await?;
        Ok(list.flavors)
    }
}

#[async_trait]
impl StatusSource for ComputeClient {
    async fn get_status(&self, server_id: &str) -> Result<StatusSnapshot> {
        let url = self.service.url(&["servers", server_id], &[])?;
        let response = self
            .service
            .send_once(&self.service.request(Method::GET, url), &[200, 203])
            .await?;
        snapshot_from_envelope(server_id, &response, "server")
    }
}
