//! Block storage volumes

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use super::{snapshot_from_envelope, string_or_number, ServiceClient};
use crate::error::Result;
use crate::wait::{StatusSnapshot, StatusSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "display_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Size in GiB
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: Volume,
}

#[derive(Deserialize)]
struct VolumeList {
    volumes: Vec<Volume>,
}

/// Volume service client
#[derive(Debug, Clone)]
pub struct VolumeClient {
    service: ServiceClient,
}

impl VolumeClient {
    pub fn new(service: ServiceClient) -> Self {
        Self { service }
    }

    #[instrument(skip(self))]
    pub async fn list_volumes(&self, detail: bool) -> Result<Vec<Volume>> {
        let segments: &[&str] = if detail {
            &["volumes", "detail"]
        } else {
            &["volumes"]
        };
        let list: VolumeList = self.service.get_json(segments, &[]).await?;
        Ok(list.volumes)
    }

    #[instrument(skip(self))]
    pub async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let envelope: VolumeEnvelope = self.service.get_json(&["volumes", volume_id], &[]).await?;
        Ok(envelope.volume)
    }

    /// Create a volume of `size` GiB, optionally attached to a server
    #[instrument(skip(self))]
    pub async fn create_volume(
        &self,
        size: u64,
        name: &str,
        server_id: Option<&str>,
    ) -> Result<Volume> {
        let mut volume = json!({ "size": size, "name": name });
        if let Some(server_id) = server_id {
            volume["server_id"] = json!(server_id);
        }
        let response = self
            .service
            .post_json(&["volumes"], &json!({ "volume": volume }), &[200, 202])
            .await?;
        let envelope: VolumeEnvelope = response.json()?;
        info!("Volume {} requested", envelope.volume.id);
        Ok(envelope.volume)
    }

    #[instrument(skip(self))]
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!("Deleting volume {}", volume_id);
        self.service.delete(&["volumes", volume_id], &[202, 204]).await
    }
}

#[async_trait]
impl StatusSource for VolumeClient {
    async fn get_status(&self, volume_id: &str) -> Result<StatusSnapshot> {
        let url = self.service.url(&["volumes", volume_id], &[])?;
        let response = self
            .service
            .send_once(&self.service.request(Method::GET, url), &[200])
            .await?;
        snapshot_from_envelope(volume_id, &response, "volume")
    }
}
