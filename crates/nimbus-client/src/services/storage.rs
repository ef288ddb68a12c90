//! Object storage: accounts, containers and objects
//!
//! Uploads use the block hashmap protocol. The object is split into
//! container-sized blocks, the list of block hashes is sent first, and only
//! the blocks the service reports as missing are transferred.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::SeekFrom;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{debug, info, instrument};

use super::ServiceClient;
use crate::error::{ClientError, ErrorKind, Result};
use crate::transport::{RawResponse, Request};
use crate::wait::{StatusSnapshot, StatusSource};

/// Status reported by [`StorageClient`] for anything that exists
pub const AVAILABLE: &str = "AVAILABLE";

const BLOCK_SIZE_HEADER: &str = "x-container-block-size";
const BLOCK_HASH_HEADER: &str = "x-container-block-hash";
const PUBLIC_HEADER: &str = "X-Object-Public";
const SHARING_HEADER: &str = "X-Object-Sharing";
const ACCOUNT_GROUP_PREFIX: &str = "x-account-group-";
const CONTAINER_META_PREFIX: &str = "x-container-meta-";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// Result of [`StorageClient::upload_object`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub bytes: u64,
    pub blocks: usize,
    /// Blocks the service did not already have
    pub uploaded_blocks: usize,
}

/// Block hash algorithms a container may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHash {
    Sha256,
    Sha512,
}

impl BlockHash {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(ClientError::protocol(format!(
                "unsupported block hash algorithm: {other}"
            ))),
        }
    }

    /// Hex digest of `block` with trailing zero bytes stripped
    pub fn digest(&self, block: &[u8]) -> String {
        let end = block.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let trimmed = &block[..end];
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(trimmed)),
            Self::Sha512 => hex::encode(Sha512::digest(trimmed)),
        }
    }
}

#[derive(Serialize)]
struct Hashmap<'a> {
    bytes: u64,
    hashes: &'a [String],
}

/// Version retention policy of an account or container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Versioning {
    /// Keep every version
    Auto,
    /// Keep only the latest version
    None,
}

impl Versioning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Versioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Versioning {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            other => Err(ClientError::request(format!(
                "unknown versioning policy '{other}' (expected auto or none)"
            ))),
        }
    }
}

/// Users and groups allowed to read or write an object
///
/// Travels as `X-Object-Sharing: read=alice,team;write=bob`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sharing {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

impl Sharing {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Parse a sharing header; unknown sections are ignored
    pub fn parse(header: &str) -> Self {
        let mut sharing = Self::default();
        for section in header.split(';') {
            let Some((kind, names)) = section.split_once('=') else {
                continue;
            };
            let names = split_list(names);
            match kind.trim().to_ascii_lowercase().as_str() {
                "read" => sharing.read = names,
                "write" => sharing.write = names,
                _ => {}
            }
        }
        sharing
    }

    /// Header value; empty when nothing is shared
    pub fn header_value(&self) -> String {
        let mut sections = Vec::new();
        if !self.read.is_empty() {
            sections.push(format!("read={}", self.read.join(",")));
        }
        if !self.write.is_empty() {
            sections.push(format!("write={}", self.write.join(",")));
        }
        sections.join(";")
    }
}

fn split_list(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Object store client bound to one account
#[derive(Debug, Clone)]
pub struct StorageClient {
    service: ServiceClient,
    account: String,
}

impl StorageClient {
    /// Use the account named by the service credentials
    pub fn new(service: ServiceClient) -> Result<Self> {
        let account = service
            .credentials()
            .account()
            .map(str::to_string)
            .ok_or_else(|| ClientError::request("no storage account configured"))?;
        Ok(Self { service, account })
    }

    pub fn with_account(service: ServiceClient, account: impl Into<String>) -> Self {
        Self {
            service,
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn request(
        &self,
        method: Method,
        path: &[&str],
        query: &[(&str, Option<&str>)],
    ) -> Result<Request> {
        let mut segments = vec![self.account.as_str()];
        segments.extend_from_slice(path);
        let url = self.service.url(&segments, query)?;
        Ok(self.service.request(method, url))
    }

    /// `POST` headers to an account, container or object
    ///
    /// With `update` the headers are merged into what is there; without it
    /// they replace the existing metadata.
    async fn post_headers<I>(&self, path: &[&str], update: bool, headers: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let query: &[(&str, Option<&str>)] = if update { &[("update", None)] } else { &[] };
        let mut request = self.request(Method::POST, path, query)?;
        for (name, value) in headers {
            request = request.header(name, value);
        }
        self.service.send(request, &[202, 204]).await?;
        Ok(())
    }

    /// Block size and hash algorithm a container stores objects with
    async fn block_params(&self, container: &str) -> Result<(usize, BlockHash)> {
        let info = self.container_info(container).await?;
        let block_size: usize = info
            .get(BLOCK_SIZE_HEADER)
            .and_then(|v| v.trim().parse().ok())
            .filter(|size| *size > 0)
            .ok_or_else(|| ClientError::protocol(format!("container has no valid {BLOCK_SIZE_HEADER}")))?;
        let algorithm = info
            .get(BLOCK_HASH_HEADER)
            .ok_or_else(|| ClientError::protocol(format!("container has no {BLOCK_HASH_HEADER}")))
            .and_then(|name| BlockHash::parse(name))?;
        Ok((block_size, algorithm))
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Account headers (`x-account-*`)
    #[instrument(skip(self))]
    pub async fn account_info(&self) -> Result<BTreeMap<String, String>> {
        let request = self.request(Method::HEAD, &[], &[])?;
        let response = self.service.send(request, &[200, 204]).await?;
        Ok(response.headers_with_prefix("x-account-"))
    }

    #[instrument(skip(self, meta))]
    pub async fn set_account_meta(&self, meta: &BTreeMap<String, String>) -> Result<()> {
        let headers = meta
            .iter()
            .map(|(key, value)| (format!("X-Account-Meta-{key}"), value.clone()));
        self.post_headers(&[], true, headers).await
    }

    /// Account quota in bytes, if one is set
    pub async fn account_quota(&self) -> Result<Option<u64>> {
        let info = self.account_info().await?;
        parse_quota(info.get("x-account-policy-quota"))
    }

    #[instrument(skip(self))]
    pub async fn set_account_quota(&self, quota: u64) -> Result<()> {
        let header = ("X-Account-Policy-Quota".to_string(), quota.to_string());
        self.post_headers(&[], true, [header]).await
    }

    pub async fn account_versioning(&self) -> Result<Option<Versioning>> {
        let info = self.account_info().await?;
        parse_versioning(info.get("x-account-policy-versioning"))
    }

    #[instrument(skip(self))]
    pub async fn set_account_versioning(&self, versioning: Versioning) -> Result<()> {
        let header = (
            "X-Account-Policy-Versioning".to_string(),
            versioning.to_string(),
        );
        self.post_headers(&[], true, [header]).await
    }

    /// User groups defined on the account, by name
    pub async fn account_groups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let info = self.account_info().await?;
        Ok(info
            .iter()
            .filter_map(|(name, members)| {
                let group = name.strip_prefix(ACCOUNT_GROUP_PREFIX)?;
                Some((group.to_string(), split_list(members)))
            })
            .collect())
    }

    /// Create or redefine a group
    #[instrument(skip(self))]
    pub async fn set_account_group(&self, group: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Err(ClientError::request(format!("group {group} needs at least one member")));
        }
        let header = (format!("X-Account-Group-{group}"), members.join(","));
        self.post_headers(&[], true, [header]).await
    }

    #[instrument(skip(self))]
    pub async fn delete_account_group(&self, group: &str) -> Result<()> {
        let header = (format!("X-Account-Group-{group}"), String::new());
        self.post_headers(&[], true, [header]).await
    }

    // =========================================================================
    // Containers
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn list_containers(&self) -> Result<Vec<ContainerEntry>> {
        let request = self.request(Method::GET, &[], &[("format", Some("json"))])?;
        let response = self.service.send(request, &[200, 204]).await?;
        listing(&response)
    }

    #[instrument(skip(self))]
    pub async fn create_container(&self, container: &str) -> Result<()> {
        let request = self.request(Method::PUT, &[container], &[])?;
        self.service.send(request, &[201, 202]).await?;
        info!("Container {} created", container);
        Ok(())
    }

    /// Delete an empty container
    #[instrument(skip(self))]
    pub async fn delete_container(&self, container: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &[container], &[])?;
        self.service.send(request, &[204]).await?;
        Ok(())
    }

    /// Container headers (`x-container-*`)
    #[instrument(skip(self))]
    pub async fn container_info(&self, container: &str) -> Result<BTreeMap<String, String>> {
        let request = self.request(Method::HEAD, &[container], &[])?;
        let response = self.service.send(request, &[200, 204]).await?;
        Ok(response.headers_with_prefix("x-container-"))
    }

    /// Delete a container together with all its objects and their history
    #[instrument(skip(self))]
    pub async fn purge_container(&self, container: &str) -> Result<()> {
        let until = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
            .to_string();
        let request = self.request(Method::DELETE, &[container], &[("until", Some(until.as_str()))])?;
        self.service.send(request, &[204]).await?;
        info!("Container {} purged", container);
        Ok(())
    }

    /// User metadata of a container, keys without the header prefix
    pub async fn container_meta(&self, container: &str) -> Result<BTreeMap<String, String>> {
        let info = self.container_info(container).await?;
        Ok(info
            .iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(CONTAINER_META_PREFIX)?;
                Some((key.to_string(), value.clone()))
            })
            .collect())
    }

    /// Add or change container metadata, keeping the other entries
    #[instrument(skip(self, meta))]
    pub async fn set_container_meta(
        &self,
        container: &str,
        meta: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.post_headers(&[container], true, container_meta_headers(meta))
            .await
    }

    /// Replace all container metadata with `meta`
    #[instrument(skip(self, meta))]
    pub async fn replace_container_meta(
        &self,
        container: &str,
        meta: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.post_headers(&[container], false, container_meta_headers(meta))
            .await
    }

    /// Remove one metadata entry; `NotFound` when the key is not set
    #[instrument(skip(self))]
    pub async fn delete_container_meta(&self, container: &str, key: &str) -> Result<()> {
        let mut meta = self.container_meta(container).await?;
        if meta.remove(&key.to_ascii_lowercase()).is_none() {
            return Err(ClientError::new(
                ErrorKind::NotFound,
                format!("X-Container-Meta-{key} not found"),
            ));
        }
        self.replace_container_meta(container, &meta).await
    }

    pub async fn container_quota(&self, container: &str) -> Result<Option<u64>> {
        let info = self.container_info(container).await?;
        parse_quota(info.get("x-container-policy-quota"))
    }

    #[instrument(skip(self))]
    pub async fn set_container_quota(&self, container: &str, quota: u64) -> Result<()> {
        let header = ("X-Container-Policy-Quota".to_string(), quota.to_string());
        self.post_headers(&[container], true, [header]).await
    }

    pub async fn container_versioning(&self, container: &str) -> Result<Option<Versioning>> {
        let info = self.container_info(container).await?;
        parse_versioning(info.get("x-container-policy-versioning"))
    }

    #[instrument(skip(self))]
    pub async fn set_container_versioning(
        &self,
        container: &str,
        versioning: Versioning,
    ) -> Result<()> {
        let header = (
            "X-Container-Policy-Versioning".to_string(),
            versioning.to_string(),
        );
        self.post_headers(&[container], true, [header]).await
    }

    #[instrument(skip(self))]
    pub async fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectEntry>> {
        let mut query = vec![("format", Some("json"))];
        if let Some(prefix) = prefix {
            query.push(("prefix", Some(prefix)));
        }
        let request = self.request(Method::GET, &[container], &query)?;
        let response = self.service.send(request, &[200, 204]).await?;
        listing(&response)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Upload `data` as `container/object`, sending only missing blocks
    pub async fn upload_object(
        &self,
        container: &str,
        object: &str,
        data: Bytes,
    ) -> Result<UploadSummary> {
        let size = data.len() as u64;
        self.upload_object_from(container, object, &mut std::io::Cursor::new(data), size)
            .await
    }

    /// Upload the first `size` bytes of `source`, one block in memory at a time
    ///
    /// The source is read once to hash every block, then the blocks the
    /// service is missing are read again by seeking to them.
    #[instrument(skip(self, source))]
    pub async fn upload_object_from<R>(
        &self,
        container: &str,
        object: &str,
        source: &mut R,
        size: u64,
    ) -> Result<UploadSummary>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let (block_size, algorithm) = self.block_params(container).await?;

        let mut buffer = vec![0u8; block_size];
        let mut hashes = Vec::new();
        // hash -> (offset, length) of its first occurrence
        let mut blocks: HashMap<String, (u64, usize)> = HashMap::new();
        let mut offset = 0u64;
        while offset < size {
            let len = block_len(size - offset, block_size);
            read_block(source, &mut buffer[..len]).await?;
            let hash = algorithm.digest(&buffer[..len]);
            blocks.entry(hash.clone()).or_insert((offset, len));
            hashes.push(hash);
            offset += len as u64;
        }
        debug!("Hashed {} blocks of {} bytes", hashes.len(), block_size);

        let hashmap = Hashmap {
            bytes: size,
            hashes: &hashes,
        };
        let path = [container, object];
        let query = [("format", Some("json")), ("hashmap", None)];

        let request = self
            .request(Method::PUT, &path, &query)?
            .json(&hashmap)?;
        let response = self.service.send(request, &[201, 409]).await?;

        let mut uploaded_blocks = 0;
        if response.status == 409 {
            let missing: Vec<String> = response.json()?;
            debug!("{} of {} blocks missing", missing.len(), hashes.len());
            for hash in &missing {
                let (offset, len) = *blocks.get(hash).ok_or_else(|| {
                    ClientError::protocol(format!("service asked for unknown block {hash}"))
                })?;
                source
                    .seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|e| ClientError::request(format!("cannot seek upload source: {e}")))?;
                read_block(source, &mut buffer[..len]).await?;
                self.put_block(container, Bytes::copy_from_slice(&buffer[..len]), hash)
                    .await?;
                uploaded_blocks += 1;
            }

            let request = self
                .request(Method::PUT, &path, &query)?
                .json(&hashmap)?;
            self.service.send(request, &[201]).await?;
        }

        info!("Uploaded {}/{} ({} new blocks)", container, object, uploaded_blocks);
        Ok(UploadSummary {
            bytes: size,
            blocks: hashes.len(),
            uploaded_blocks,
        })
    }

    /// Append the first `size` bytes of `source` to an existing object
    #[instrument(skip(self, source))]
    pub async fn append_object<R>(
        &self,
        container: &str,
        object: &str,
        source: &mut R,
        size: u64,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (block_size, _) = self.block_params(container).await?;
        let mut buffer = vec![0u8; block_size];
        let mut offset = 0u64;
        while offset < size {
            let len = block_len(size - offset, block_size);
            read_block(source, &mut buffer[..len]).await?;
            self.post_range(container, object, "bytes */*", &buffer[..len])
                .await?;
            offset += len as u64;
        }
        info!("Appended {} bytes to {}/{}", size, container, object);
        Ok(size)
    }

    /// Cut an object down to its first `bytes` bytes
    #[instrument(skip(self))]
    pub async fn truncate_object(&self, container: &str, object: &str, bytes: u64) -> Result<()> {
        let headers = [
            ("Content-Range".to_string(), format!("bytes 0-{bytes}/*")),
            ("Content-Type".to_string(), "application/octet-stream".to_string()),
            ("X-Object-Bytes".to_string(), bytes.to_string()),
            ("X-Source-Object".to_string(), format!("/{container}/{object}")),
        ];
        self.post_headers(&[container, object], true, headers).await
    }

    /// Replace bytes `start..=end` of an object with the same number of
    /// bytes read from `source`
    #[instrument(skip(self, source))]
    pub async fn overwrite_object<R>(
        &self,
        container: &str,
        object: &str,
        start: u64,
        end: u64,
        source: &mut R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        if end < start {
            return Err(ClientError::request(format!(
                "invalid byte range {start}-{end}"
            )));
        }
        let (block_size, _) = self.block_params(container).await?;
        let size = end - start + 1;
        let mut buffer = vec![0u8; block_size];
        let mut offset = 0u64;
        while offset < size {
            let len = block_len(size - offset, block_size);
            read_block(source, &mut buffer[..len]).await?;
            let first = start + offset;
            let last = first + len as u64 - 1;
            self.post_range(container, object, &format!("bytes {first}-{last}/*"), &buffer[..len])
                .await?;
            offset += len as u64;
        }
        info!("Overwrote bytes {}-{} of {}/{}", start, end, container, object);
        Ok(size)
    }

    async fn post_range(
        &self,
        container: &str,
        object: &str,
        range: &str,
        block: &[u8],
    ) -> Result<()> {
        let request = self
            .request(Method::POST, &[container, object], &[("update", None)])?
            .header("Content-Range", range)
            .header("Content-Type", "application/octet-stream")
            .body(Bytes::copy_from_slice(block));
        self.service.send(request, &[202, 204]).await?;
        Ok(())
    }

    async fn put_block(&self, container: &str, block: Bytes, hash: &str) -> Result<()> {
        let request = self
            .request(Method::POST, &[container], &[("update", None)])?
            .header("Content-Type", "application/octet-stream")
            .body(block);
        let response = self.service.send(request, &[202]).await?;
        let echoed = response.text_lossy();
        if echoed.trim() != hash {
            return Err(ClientError::protocol(format!(
                "block hash mismatch: sent {hash}, service computed {}",
                echoed.trim()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn download_object(&self, container: &str, object: &str) -> Result<Bytes> {
        let request = self.request(Method::GET, &[container, object], &[])?;
        let response = self.service.send(request, &[200]).await?;
        Ok(response.body)
    }

    #[instrument(skip(self))]
    pub async fn delete_object(&self, container: &str, object: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &[container, object], &[])?;
        self.service.send(request, &[204]).await?;
        Ok(())
    }

    /// All object headers
    #[instrument(skip(self))]
    pub async fn object_info(&self, container: &str, object: &str) -> Result<BTreeMap<String, String>> {
        let request = self.request(Method::HEAD, &[container, object], &[])?;
        let response = self.service.send(request, &[200, 204]).await?;
        Ok(response.header_map())
    }

    #[instrument(skip(self, meta))]
    pub async fn set_object_meta(
        &self,
        container: &str,
        object: &str,
        meta: &BTreeMap<String, String>,
    ) -> Result<()> {
        let headers = meta
            .iter()
            .map(|(key, value)| (format!("X-Object-Meta-{key}"), value.clone()));
        self.post_headers(&[container, object], true, headers).await
    }

    pub async fn object_sharing(&self, container: &str, object: &str) -> Result<Sharing> {
        let info = self.object_info(container, object).await?;
        Ok(info
            .get("x-object-sharing")
            .map(|header| Sharing::parse(header))
            .unwrap_or_default())
    }

    /// Replace the sharing permissions of an object
    #[instrument(skip(self))]
    pub async fn set_object_sharing(
        &self,
        container: &str,
        object: &str,
        sharing: &Sharing,
    ) -> Result<()> {
        let header = (SHARING_HEADER.to_string(), sharing.header_value());
        self.post_headers(&[container, object], true, [header]).await
    }

    /// Stop sharing an object with anyone
    pub async fn delete_object_sharing(&self, container: &str, object: &str) -> Result<()> {
        self.set_object_sharing(container, object, &Sharing::default())
            .await
    }

    /// Make an object publicly readable; returns its public path if reported
    #[instrument(skip(self))]
    pub async fn publish_object(&self, container: &str, object: &str) -> Result<Option<String>> {
        self.set_public(container, object, true).await?;
        let info = self.object_info(container, object).await?;
        Ok(info.get("x-object-public").cloned())
    }

    #[instrument(skip(self))]
    pub async fn unpublish_object(&self, container: &str, object: &str) -> Result<()> {
        self.set_public(container, object, false).await
    }

    async fn set_public(&self, container: &str, object: &str, public: bool) -> Result<()> {
        let header = (PUBLIC_HEADER.to_string(), public.to_string());
        self.post_headers(&[container, object], true, [header]).await
    }
}

fn container_meta_headers(
    meta: &BTreeMap<String, String>,
) -> impl Iterator<Item = (String, String)> + '_ {
    meta.iter()
        .map(|(key, value)| (format!("X-Container-Meta-{key}"), value.clone()))
}

fn parse_quota(header: Option<&String>) -> Result<Option<u64>> {
    header
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ClientError::protocol(format!("invalid quota {value:?}")))
        })
        .transpose()
}

fn parse_versioning(header: Option<&String>) -> Result<Option<Versioning>> {
    header
        .map(|value| {
            value
                .parse()
                .map_err(|_| ClientError::protocol(format!("invalid versioning {value:?}")))
        })
        .transpose()
}

fn block_len(remaining: u64, block_size: usize) -> usize {
    remaining.min(block_size as u64) as usize
}

async fn read_block<R: AsyncRead + Unpin>(source: &mut R, buffer: &mut [u8]) -> Result<()> {
    source
        .read_exact(buffer)
        .await
        .map(|_| ())
        .map_err(|e| ClientError::request(format!("cannot read upload source: {e}")))
}

/// Decode a JSON listing; `204 No Content` is an empty listing
fn listing<T: serde::de::DeserializeOwned>(response: &RawResponse) -> Result<Vec<T>> {
    if response.status == 204 || response.body.is_empty() {
        return Ok(Vec::new());
    }
    response.json()
}

/// Split `container/object` at the first slash
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('/') {
        Some((container, object)) if !object.is_empty() => (container, Some(object)),
        Some((container, _)) => (container, None),
        None => (path, None),
    }
}

#[async_trait]
impl StatusSource for StorageClient {
    /// `resource_id` is `container` or `container/object`
    async fn get_status(&self, resource_id: &str) -> Result<StatusSnapshot> {
        let (container, object) = split_path(resource_id);
        if container.is_empty() {
            return Err(ClientError::new(ErrorKind::RequestError, "empty container name"));
        }
        let (path, prefix) = match object {
            Some(object) => (vec![container, object], ""),
            None => (vec![container], "x-container-"),
        };
        let request = self.request(Method::HEAD, &path, &[])?;
        let response = self.service.send_once(&request, &[200, 204]).await?;
        let headers = response.headers_with_prefix(prefix);
        Ok(StatusSnapshot {
            resource_id: resource_id.to_string(),
            status: AVAILABLE.to_string(),
            metadata: headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_strips_trailing_zeros() {
        let hash = BlockHash::Sha256;
        assert_eq!(hash.digest(b"abc\0\0\0"), hash.digest(b"abc"));
        assert_eq!(
            hash.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        // interior zeros are kept
        assert_ne!(hash.digest(b"a\0bc"), hash.digest(b"abc"));
        assert_eq!(hash.digest(b"\0\0"), hash.digest(b""));
    }

    #[test]
    fn test_block_hash_parse() {
        assert_eq!(BlockHash::parse("SHA256").unwrap(), BlockHash::Sha256);
        assert_eq!(BlockHash::parse("sha512").unwrap(), BlockHash::Sha512);
        assert_eq!(
            BlockHash::parse("md5").unwrap_err().kind,
            ErrorKind::ProtocolError
        );
    }

    #[test]
    fn test_sharing_header() {
        let sharing = Sharing {
            read: vec!["alice".to_string(), "ops".to_string()],
            write: vec!["bob".to_string()],
        };
        assert_eq!(sharing.header_value(), "read=alice,ops;write=bob");
        assert_eq!(Sharing::parse(&sharing.header_value()), sharing);

        let write_only = Sharing::parse(" write = bob , ;other=x");
        assert!(write_only.read.is_empty());
        assert_eq!(write_only.write, ["bob"]);
        assert_eq!(write_only.header_value(), "write=bob");
        assert_eq!(Sharing::default().header_value(), "");
    }

    #[test]
    fn test_versioning_parse() {
        assert_eq!("AUTO".parse::<Versioning>().unwrap(), Versioning::Auto);
        assert_eq!(Versioning::None.to_string(), "none");
        assert_eq!(
            "weekly".parse::<Versioning>().unwrap_err().kind,
            ErrorKind::RequestError
        );
    }

    #[test]
    fn test_policy_headers() {
        assert_eq!(parse_quota(Some(&"1024".to_string())).unwrap(), Some(1024));
        assert_eq!(parse_quota(None).unwrap(), None);
        assert_eq!(
            parse_quota(Some(&"lots".to_string())).unwrap_err().kind,
            ErrorKind::ProtocolError
        );
        assert_eq!(
            parse_versioning(Some(&"auto".to_string())).unwrap(),
            Some(Versioning::Auto)
        );
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("photos/2024/a.jpg"), ("photos", Some("2024/a.jpg")));
        assert_eq!(split_path("photos"), ("photos", None));
        assert_eq!(split_path("photos/"), ("photos", None));
    }
}
