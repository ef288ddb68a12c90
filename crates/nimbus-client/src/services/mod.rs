//! Per-service resource clients
//!
//! Every client wraps a [`ServiceClient`], which binds a transport to one
//! resolved endpoint and one set of credentials.

mod compute;
mod identity;
mod network;
mod storage;
mod volume;

pub use compute::*;
pub use identity::*;
pub use network::*;
pub use storage::*;
pub use volume::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::credentials::Credentials;
use crate::encoding::join_url;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use crate::transport::{RawResponse, Request, Transport, AUTH_TOKEN_HEADER};
use crate::wait::StatusSnapshot;

/// Transport bound to one endpoint and one set of credentials
#[derive(Debug, Clone)]
pub struct ServiceClient {
    transport: Transport,
    endpoint: Arc<Endpoint>,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl ServiceClient {
    pub fn new(transport: Transport, endpoint: Arc<Endpoint>, credentials: Credentials) -> Self {
        Self {
            transport,
            endpoint,
            credentials,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry policy for idempotent (`GET`/`HEAD`) requests
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Endpoint URL extended by encoded `segments` and `query`
    pub fn url(&self, segments: &[&str], query: &[(&str, Option<&str>)]) -> Result<Url> {
        join_url(self.endpoint.endpoint_url(), segments, query)
    }

    /// An authenticated request
    pub fn request(&self, method: Method, url: Url) -> Request {
        Request::new(method, url)
            .header(AUTH_TOKEN_HEADER, self.credentials.token())
            .header("Accept", "application/json")
    }

    /// Send `request`; statuses outside `expect` become errors
    pub async fn send(&self, request: Request, expect: &[u16]) -> Result<RawResponse> {
        let idempotent = request.method == Method::GET || request.method == Method::HEAD;
        let policy = if idempotent {
            self.retry
        } else {
            RetryPolicy::none()
        };
        policy.run(|| self.send_once(&request, expect)).await
    }

    /// Send `request` exactly once, whatever the retry policy
    ///
    /// Status polls go through here: the wait engine counts failed polls
    /// against its own cap, and a second retry layer underneath would
    /// multiply the requests and stretch the deadline.
    pub async fn send_once(&self, request: &Request, expect: &[u16]) -> Result<RawResponse> {
        let response = self.transport.send(request).await?;
        if expect.contains(&response.status) {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, Option<&str>)],
    ) -> Result<T> {
        let url = self.url(segments, query)?;
        self.send(self.request(Method::GET, url), &[200, 203])
            .await?
            .json()
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
        expect: &[u16],
    ) -> Result<RawResponse> {
        let url = self.url(segments, &[])?;
        let request = self.request(Method::POST, url).json(body)?;
        self.send(request, expect).await
    }

    pub async fn delete(&self, segments: &[&str], expect: &[u16]) -> Result<()> {
        let url = self.url(segments, &[])?;
        self.send(self.request(Method::DELETE, url), expect).await?;
        Ok(())
    }
}

/// Accept ids sent either as JSON strings or numbers
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Pull `{"<key>": {...}}` out of a response body and turn it into a snapshot
pub(crate) fn snapshot_from_envelope(
    resource_id: &str,
    response: &RawResponse,
    key: &str,
) -> Result<StatusSnapshot> {
    let body: serde_json::Value = response.json()?;
    let object = body
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| ClientError::protocol(format!("response has no \"{key}\" object")))?;

    let status = object
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClientError::protocol(format!("{key} {resource_id} has no status field")))?;

    let metadata: BTreeMap<String, String> = object
        .iter()
        .filter(|(k, _)| k.as_str() != "status")
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect();

    Ok(StatusSnapshot {
        resource_id: resource_id.to_string(),
        status: status.to_string(),
        metadata,
    })
}

/// `{"id": 3, "links": [...]}` style reference to another resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}
