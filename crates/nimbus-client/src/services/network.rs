//! Virtual networks

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use super::{snapshot_from_envelope, string_or_number, ServiceClient};
use crate::error::Result;
use crate::wait::{StatusSnapshot, StatusSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub network_type: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Deserialize)]
struct NetworkEnvelope {
    network: Network,
}

#[derive(Deserialize)]
struct NetworkList {
    networks: Vec<Network>,
}

/// Network service client
#[derive(Debug, Clone)]
pub struct NetworkClient {
    service: ServiceClient,
}

impl NetworkClient {
    pub fn new(service: ServiceClient) -> Self {
        Self { service }
    }

    #[instrument(skip(self))]
    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        let list: NetworkList = self.service.get_json(&["networks"], &[]).await?;
        Ok(list.networks)
    }

    #[instrument(skip(self))]
    pub async fn get_network(&self, network_id: &str) -> Result<Network> {
        let envelope: NetworkEnvelope = self
            .service
            .get_json(&["networks", network_id], &[])
            .await?;
        Ok(envelope.network)
    }

    /// Create a network; `network_type` defaults to the service's choice
    #[instrument(skip(self))]
    pub async fn create_network(&self, name: &str, network_type: Option<&str>) -> Result<Network> {
        let mut network = json!({ "name": name });
        if let Some(network_type) = network_type {
            network["type"] = json!(network_type);
        }
        let response = self
            .service
            .post_json(&["networks"], &json!({ "network": network }), &[200, 201, 202])
            .await?;
        let envelope: NetworkEnvelope = response.json()?;
        info!("Network {} requested", envelope.network.id);
        Ok(envelope.network)
    }

    #[instrument(skip(self))]
    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        info!("Deleting network {}", network_id);
        self.service.delete(&["networks", network_id], &[202, 204]).await
    }
}

#[async_trait]
impl StatusSource for NetworkClient {
    async fn get_status(&self, network_id: &str) -> Result<StatusSnapshot> {
        let url = self.service.url(&["networks", network_id], &[])?;
        let response = self
            .service
            .send_once(&self.service.request(Method::GET, url), &[200])
            .await?;
        snapshot_from_envelope(network_id, &response, "network")
    }
}
