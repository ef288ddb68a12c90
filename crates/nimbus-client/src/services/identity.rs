//! Identity service: token authentication, service catalog and user names
//!
//! Authentication results are cached per credentials, so repeated catalog
//! lookups for the same token cost a single round trip.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::credentials::{Credentials, CredentialsId};
use crate::encoding::join_url;
use crate::endpoint::{Endpoint, ServiceCatalog, ServiceType};
use crate::error::{ClientError, Result};
use crate::transport::{Request, Transport, AUTH_TOKEN_HEADER};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    #[serde(default, rename = "versionId")]
    pub version_id: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

/// Result of authenticating a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessInfo {
    pub token: TokenInfo,
    pub user: UserInfo,
    #[serde(default, rename = "serviceCatalog")]
    pub service_catalog: Vec<CatalogService>,
}

#[derive(Deserialize)]
struct AccessEnvelope {
    access: AccessInfo,
}

#[derive(Deserialize)]
struct UserCatalogs {
    #[serde(default)]
    uuid_catalog: BTreeMap<String, String>,
    #[serde(default)]
    displayname_catalog: BTreeMap<String, String>,
}

#[derive(Default)]
struct NameCache {
    uuid_to_name: BTreeMap<String, String>,
    name_to_uuid: BTreeMap<String, String>,
}

/// Identity service client with per-credentials caches
pub struct IdentityClient {
    transport: Transport,
    auth_url: Url,
    access: RwLock<HashMap<CredentialsId, Arc<AccessInfo>>>,
    names: RwLock<HashMap<CredentialsId, NameCache>>,
}

impl IdentityClient {
    pub fn new(transport: Transport, auth_url: Url) -> Self {
        Self {
            transport,
            auth_url,
            access: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
        }
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// Authenticate `credentials`, replacing any cached result
    #[instrument(skip(self, credentials))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Arc<AccessInfo>> {
        let url = join_url(&self.auth_url, &["tokens"], &[])?;
        let request = Request::new(Method::POST, url)
            .header(AUTH_TOKEN_HEADER, credentials.token())
            .header("Accept", "application/json")
            .json(&json!({ "auth": { "token": { "id": credentials.token() } } }))?;

        let response = self.transport.send(&request).await?;
        if response.status != 200 {
            return Err(response.into_error());
        }
        let envelope: AccessEnvelope = response.json()?;
        let access = Arc::new(envelope.access);
        info!("Authenticated user {}", access.user.id);

        self.access
            .write()
            .insert(credentials.identity(), access.clone());
        Ok(access)
    }

    /// Cached authentication result, authenticating on first use
    pub async fn access(&self, credentials: &Credentials) -> Result<Arc<AccessInfo>> {
        let cached = self.access.read().get(&credentials.identity()).cloned();
        match cached {
            Some(access) => Ok(access),
            None => self.authenticate(credentials).await,
        }
    }

    /// Forget everything cached for `credentials`
    pub fn invalidate(&self, credentials: &Credentials) {
        let identity = credentials.identity();
        self.access.write().remove(&identity);
        self.names.write().remove(&identity);
    }

    pub async fn service_catalog(&self, credentials: &Credentials) -> Result<Vec<CatalogService>> {
        Ok(self.access(credentials).await?.service_catalog.clone())
    }

    /// Catalog entry of `service_type` (case-insensitive)
    pub async fn service_details(
        &self,
        service_type: &str,
        credentials: &Credentials,
    ) -> Result<CatalogService> {
        let access = self.access(credentials).await?;
        find_service(&access.service_catalog, service_type).cloned()
    }

    /// The single endpoint of `service_type`, optionally of `version`
    pub async fn service_endpoint(
        &self,
        service_type: &str,
        version: Option<&str>,
        credentials: &Credentials,
    ) -> Result<CatalogEndpoint> {
        let access = self.access(credentials).await?;
        let service = find_service(&access.service_catalog, service_type)?;
        single_endpoint(service, version).cloned()
    }

    pub async fn user_info(&self, credentials: &Credentials) -> Result<UserInfo> {
        Ok(self.access(credentials).await?.user.clone())
    }

    /// One field of the user record: `id`, `name` or any extra field
    pub async fn user_term(&self, key: &str, credentials: &Credentials) -> Result<Option<Value>> {
        let user = self.user_info(credentials).await?;
        Ok(match key {
            "id" => Some(Value::String(user.id)),
            "name" => user.name.map(Value::String),
            other => user.extra.get(other).cloned(),
        })
    }

    /// Users authenticated through this client so far, ordered by id
    pub fn list_users(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self
            .access
            .read()
            .values()
            .map(|access| access.user.clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users.dedup_by(|a, b| a.id == b.id);
        users
    }

    /// Token a cached user authenticated with
    pub fn cached_token(&self, user_id: &str) -> Option<String> {
        self.access
            .read()
            .values()
            .find(|access| access.user.id == user_id)
            .map(|access| access.token.id.clone())
    }

    /// Drop every cache entry of `user_id`; false when none existed
    pub fn remove_user(&self, user_id: &str) -> bool {
        let mut access = self.access.write();
        let identities: Vec<CredentialsId> = access
            .iter()
            .filter(|(_, cached)| cached.user.id == user_id)
            .map(|(identity, _)| *identity)
            .collect();
        let mut names = self.names.write();
        for identity in &identities {
            access.remove(identity);
            names.remove(identity);
        }
        !identities.is_empty()
    }

    /// Map user ids to display names; only unknown ids go to the service
    #[instrument(skip(self, credentials))]
    pub async fn uuids_to_usernames(
        &self,
        uuids: &[String],
        credentials: &Credentials,
    ) -> Result<BTreeMap<String, String>> {
        let identity = credentials.identity();
        let missing: Vec<&String> = {
            let names = self.names.read();
            let known = names.get(&identity);
            uuids
                .iter()
                .filter(|u| known.map_or(true, |c| !c.uuid_to_name.contains_key(*u)))
                .collect()
        };

        if !missing.is_empty() {
            let catalogs = self
                .user_catalogs(json!({ "uuids": missing }), credentials)
                .await?;
            let mut names = self.names.write();
            let cache = names.entry(identity).or_default();
            for (uuid, name) in catalogs.uuid_catalog {
                cache.name_to_uuid.insert(name.clone(), uuid.clone());
                cache.uuid_to_name.insert(uuid, name);
            }
        }

        let names = self.names.read();
        Ok(lookup_all(names.get(&identity).map(|c| &c.uuid_to_name), uuids))
    }

    /// Map display names to user ids; only unknown names go to the service
    #[instrument(skip(self, credentials))]
    pub async fn usernames_to_uuids(
        &self,
        usernames: &[String],
        credentials: &Credentials,
    ) -> Result<BTreeMap<String, String>> {
        let identity = credentials.identity();
        let missing: Vec<&String> = {
            let names = self.names.read();
            let known = names.get(&identity);
            usernames
                .iter()
                .filter(|n| known.map_or(true, |c| !c.name_to_uuid.contains_key(*n)))
                .collect()
        };

        if !missing.is_empty() {
            let catalogs = self
                .user_catalogs(json!({ "displaynames": missing }), credentials)
                .await?;
            let mut names = self.names.write();
            let cache = names.entry(identity).or_default();
            for (name, uuid) in catalogs.displayname_catalog {
                cache.uuid_to_name.insert(uuid.clone(), name.clone());
                cache.name_to_uuid.insert(name, uuid);
            }
        }

        let names = self.names.read();
        Ok(lookup_all(names.get(&identity).map(|c| &c.name_to_uuid), usernames))
    }

    async fn user_catalogs(&self, body: Value, credentials: &Credentials) -> Result<UserCatalogs> {
        let url = join_url(&self.auth_url, &["user_catalogs"], &[])?;
        let request = Request::new(Method::POST, url)
            .header(AUTH_TOKEN_HEADER, credentials.token())
            .header("Accept", "application/json")
            .json(&body)?;
        let response = self.transport.send(&request).await?;
        if response.status != 200 {
            return Err(response.into_error());
        }
        response.json()
    }
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient")
            .field("auth_url", &self.auth_url.as_str())
            .field("cached_users", &self.access.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceCatalog for IdentityClient {
    async fn lookup(
        &self,
        service_type: ServiceType,
        version: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Endpoint> {
        let found = self
            .service_endpoint(service_type.as_str(), version, credentials)
            .await?;
        let url = Url::parse(&found.public_url).map_err(|e| {
            ClientError::protocol(format!(
                "catalog URL {:?} for {service_type} is invalid: {e}",
                found.public_url
            ))
        })?;
        debug!("Catalog endpoint for {}: {}", service_type, url);
        Ok(Endpoint::new(service_type, url, found.version_id))
    }
}

fn find_service<'a>(catalog: &'a [CatalogService], service_type: &str) -> Result<&'a CatalogService> {
    catalog
        .iter()
        .find(|s| s.service_type.eq_ignore_ascii_case(service_type))
        .ok_or_else(|| {
            ClientError::endpoint_not_found(format!(
                "service type \"{service_type}\" not in service catalog"
            ))
        })
}

fn single_endpoint<'a>(
    service: &'a CatalogService,
    version: Option<&str>,
) -> Result<&'a CatalogEndpoint> {
    let matches: Vec<&CatalogEndpoint> = service
        .endpoints
        .iter()
        .filter(|e| match version {
            None => true,
            Some(v) => e
                .version_id
                .as_deref()
                .is_some_and(|id| id.eq_ignore_ascii_case(v)),
        })
        .collect();

    match matches.as_slice() {
        [only] => Ok(only),
        _ => {
            if matches.len() > 1 {
                warn!("Ambiguous catalog entry for {}", service.service_type);
            }
            Err(ClientError::endpoint_not_found(format!(
                "{} endpoints match type {}{}",
                matches.len(),
                service.service_type,
                version.map(|v| format!(" and version {v}")).unwrap_or_default()
            )))
        }
    }
}

fn lookup_all(
    known: Option<&BTreeMap<String, String>>,
    keys: &[String],
) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|k| {
            known
                .and_then(|m| m.get(k))
                .map(|v| (k.clone(), v.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogService> {
        serde_json::from_value(json!([
            {"type": "compute", "name": "cyclades", "endpoints": [
                {"versionId": "v2.0", "publicURL": "https://cloud.example.org/compute/v2.0"}
            ]},
            {"type": "object-store", "endpoints": [
                {"versionId": "v1", "publicURL": "https://cloud.example.org/object-store/v1"},
                {"versionId": "v2", "publicURL": "https://cloud.example.org/object-store/v2"}
            ]},
            {"type": "network", "endpoints": []}
        ]))
        .unwrap()
    }

    #[test]
    fn test_find_service_is_case_insensitive() {
        let catalog = catalog();
        assert_eq!(find_service(&catalog, "COMPUTE").unwrap().name.as_deref(), Some("cyclades"));
        let err = find_service(&catalog, "image").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::EndpointNotFound);
    }

    #[test]
    fn test_single_endpoint_requires_exactly_one_match() {
        let catalog = catalog();
        let compute = find_service(&catalog, "compute").unwrap();
        assert!(single_endpoint(compute, None).is_ok());
        assert!(single_endpoint(compute, Some("V2.0")).is_ok());
        assert!(single_endpoint(compute, Some("v3")).is_err());

        let storage = find_service(&catalog, "object-store").unwrap();
        let err = single_endpoint(storage, None).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::EndpointNotFound);
        assert!(err.message.starts_with("2 endpoints"));
        assert_eq!(
            single_endpoint(storage, Some("v2")).unwrap().public_url,
            "https://cloud.example.org/object-store/v2"
        );

        let network = find_service(&catalog, "network").unwrap();
        assert!(single_endpoint(network, None).is_err());
    }

    #[test]
    fn test_access_envelope_decoding() {
        let envelope: AccessEnvelope = serde_json::from_value(json!({
            "access": {
                "token": {"id": "t0k3n", "expires": "2030-01-01T00:00:00Z"},
                "user": {"id": "u-1", "name": "alice@example.org", "roles": []},
                "serviceCatalog": []
            }
        }))
        .unwrap();
        assert_eq!(envelope.access.user.id, "u-1");
        assert!(envelope.access.user.extra.contains_key("roles"));
    }
}
