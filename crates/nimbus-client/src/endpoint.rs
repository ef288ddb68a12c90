//! Service endpoint resolution
//!
//! Maps a (service type, credentials) pair onto the base URL of that
//! service. Explicit overrides win; otherwise the identity service catalog
//! is consulted. Results are cached per credentials identity for the life
//! of the session.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::credentials::{Credentials, CredentialsId};
use crate::error::{ClientError, Result};

/// Service families the client knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Compute,
    Volume,
    Network,
    ObjectStore,
    Identity,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        Self::Compute,
        Self::Volume,
        Self::Network,
        Self::ObjectStore,
        Self::Identity,
    ];

    /// Name used in the service catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Volume => "volume",
            Self::Network => "network",
            Self::ObjectStore => "object-store",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compute" | "cyclades" => Ok(Self::Compute),
            "volume" | "block-storage" => Ok(Self::Volume),
            "network" => Ok(Self::Network),
            "object-store" | "storage" | "file" | "pithos" => Ok(Self::ObjectStore),
            "identity" | "account" | "astakos" => Ok(Self::Identity),
            other => Err(ClientError::request(format!("unknown service type: {other}"))),
        }
    }
}

/// Resolved service location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service_type: ServiceType,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(alias = "base_url")]
    endpoint_url: Url,
}

impl Endpoint {
    pub fn new(service_type: ServiceType, endpoint_url: Url, version: Option<String>) -> Self {
        Self {
            service_type,
            version,
            endpoint_url,
        }
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.endpoint_url
    }

    pub fn set_endpoint_url(&mut self, url: Url) {
        self.endpoint_url = url;
    }

    /// Former name of [`Endpoint::endpoint_url`]; same value
    #[deprecated(note = "use `endpoint_url`")]
    pub fn base_url(&self) -> &Url {
        self.endpoint_url()
    }

    /// Former name of [`Endpoint::set_endpoint_url`]; same value
    #[deprecated(note = "use `set_endpoint_url`")]
    pub fn set_base_url(&mut self, url: Url) {
        self.set_endpoint_url(url)
    }
}

/// Per-service override supplied by configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOverride {
    #[serde(default, alias = "base_url", skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Source of endpoints when no override applies
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn lookup(
        &self,
        service_type: ServiceType,
        version: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Endpoint>;
}

type CacheKey = (ServiceType, CredentialsId);

/// Session-scoped, thread-safe endpoint resolver
pub struct EndpointResolver {
    catalog: Option<Arc<dyn ServiceCatalog>>,
    overrides: HashMap<ServiceType, ServiceOverride>,
    cache: RwLock<HashMap<CacheKey, Arc<Endpoint>>>,
}

impl EndpointResolver {
    pub fn new(catalog: Option<Arc<dyn ServiceCatalog>>) -> Self {
        Self {
            catalog,
            overrides: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<ServiceType, ServiceOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_override(mut self, service_type: ServiceType, service: ServiceOverride) -> Self {
        self.overrides.insert(service_type, service);
        self
    }

    /// Resolve the endpoint of `service_type` for `credentials`
    ///
    /// Cached entries are returned as-is; the cache lock is never held
    /// across the catalog lookup.
    #[instrument(skip(self, credentials))]
    pub async fn resolve(
        &self,
        service_type: ServiceType,
        credentials: &Credentials,
    ) -> Result<Arc<Endpoint>> {
        let key = (service_type, credentials.identity());
        let cached = self.cache.read().get(&key).cloned();
        if let Some(endpoint) = cached {
            return Ok(endpoint);
        }

        let service = self.overrides.get(&service_type);
        let version = service.and_then(|s| s.version.clone());

        let endpoint = match service.and_then(|s| s.endpoint_url.clone()) {
            Some(url) => Endpoint::new(service_type, url, version),
            None => match &self.catalog {
                Some(catalog) => {
                    catalog
                        .lookup(service_type, version.as_deref(), credentials)
                        .await?
                }
                None => {
                    return Err(ClientError::endpoint_not_found(format!(
                        "no endpoint configured for service type {service_type}"
                    )))
                }
            },
        };

        debug!(
            "Resolved {} endpoint: {}",
            service_type,
            endpoint.endpoint_url()
        );

        // A concurrent resolution may have landed first; keep that one.
        let mut cache = self.cache.write();
        Ok(cache.entry(key).or_insert_with(|| Arc::new(endpoint)).clone())
    }

    /// Drop every cached endpoint resolved with `credentials`
    pub fn invalidate(&self, credentials: &Credentials) {
        let identity = credentials.identity();
        self.cache.write().retain(|(_, id), _| *id != identity);
    }

    /// Number of cached endpoints
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("overrides", &self.overrides)
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}
