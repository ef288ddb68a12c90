//! HTTP(S) transport
//!
//! A [`Transport`] performs exactly one HTTP call per [`Transport::execute`]
//! and never retries. It owns the connection pools, so clones are cheap and
//! may be used from many tasks at once.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};
use url::Url;

use crate::error::{ClientError, Result, TransportError};
use crate::logging::{sanitize, Direction, LogRecord, RequestLog, TracingRequestLog, REDACTED};

/// Header carrying the session token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest body excerpt written to the request log
const MAX_LOGGED_BODY_CHARS: usize = 2048;

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Verify server certificates (default: on)
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            request_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: format!("nimbus/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A single outgoing call
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ClientError::request(format!("cannot encode request body: {e}")))?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response as received, before any decoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value, if present and valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Headers whose (lowercase) name starts with `prefix`, case-insensitively
    pub fn headers_with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        let prefix = prefix.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(&prefix))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    /// All headers as a name → value map
    pub fn header_map(&self) -> BTreeMap<String, String> {
        self.headers_with_prefix("")
    }

    /// Decode the body as JSON; a decode failure is a `ProtocolError`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ClientError::protocol(format!("malformed response body: {e}")).with_status(self.status)
        })
    }

    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Translate this response into an error
    pub fn into_error(self) -> ClientError {
        ClientError::from_status(self.status, &self.body)
    }
}

/// HTTP(S) transport with request logging
#[derive(Clone)]
pub struct Transport {
    secure: Client,
    insecure: Client,
    config: TransportConfig,
    log: Arc<dyn RequestLog>,
    insecure_warned: Arc<AtomicBool>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a transport writing its request log to `log`
    pub fn new(config: TransportConfig, log: Arc<dyn RequestLog>) -> Result<Self> {
        let secure = Self::build_client(&config, true)?;
        let insecure = Self::build_client(&config, false)?;

        Ok(Self {
            secure,
            insecure,
            config,
            log,
            insecure_warned: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a transport with default settings logging through `tracing`
    pub fn with_defaults() -> Result<Self> {
        Self::new(TransportConfig::default(), Arc::new(TracingRequestLog))
    }

    fn build_client(config: &TransportConfig, verify_tls: bool) -> Result<Client> {
        Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| ClientError::request(format!("cannot build HTTP client: {e}")))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Execute with the configured TLS verification
    pub async fn send(&self, request: &Request) -> std::result::Result<RawResponse, TransportError> {
        self.execute(request, self.config.verify_tls).await
    }

    /// Perform one HTTP call
    ///
    /// `verify_tls = false` is an explicit opt-out and is logged as a warning.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(
        &self,
        request: &Request,
        verify_tls: bool,
    ) -> std::result::Result<RawResponse, TransportError> {
        let client = if verify_tls {
            &self.secure
        } else {
            if !self.insecure_warned.swap(true, Ordering::Relaxed) {
                warn!("TLS certificate verification is disabled");
            }
            &self.insecure
        };

        let secrets = secrets_of(request);
        self.log_request(request, &secrets);

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, verify_tls))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(e, verify_tls))?;

        let raw = RawResponse {
            status,
            headers,
            body,
        };
        self.log_response(&raw, &secrets);

        Ok(raw)
    }

    fn log_request(&self, request: &Request, secrets: &[&str]) {
        self.emit(
            Direction::Request,
            format!("{} {}", request.method, request.url),
            secrets,
        );
        for (name, value) in &request.headers {
            let shown = if is_secret_header(name) {
                REDACTED
            } else {
                value.as_str()
            };
            self.emit(Direction::Request, format!("{name}: {shown}"), secrets);
        }
        if let Some(body) = &request.body {
            self.emit(Direction::Request, format!("data size: {}", body.len()), secrets);
            if is_textual(request.header_value("Content-Type")) {
                self.emit(
                    Direction::Request,
                    String::from_utf8_lossy(body).into_owned(),
                    secrets,
                );
            }
        }
    }

    fn log_response(&self, response: &RawResponse, secrets: &[&str]) {
        let reason = reqwest::StatusCode::from_u16(response.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");
        self.emit(
            Direction::Response,
            format!("{} {}", response.status, reason),
            secrets,
        );
        for (name, value) in response.headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes());
            self.emit(Direction::Response, format!("{name}: {value}"), secrets);
        }
        self.emit(
            Direction::Response,
            format!("data size: {}", response.body.len()),
            secrets,
        );
        if !response.body.is_empty() && is_textual(response.header("content-type")) {
            self.emit(Direction::Response, response.text_lossy().into_owned(), secrets);
        }
    }

    fn emit(&self, direction: Direction, message: String, secrets: &[&str]) {
        self.log.record(LogRecord {
            direction,
            message: sanitize(&message, secrets, MAX_LOGGED_BODY_CHARS),
        });
    }
}

fn is_secret_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(AUTH_TOKEN_HEADER) || name.eq_ignore_ascii_case("authorization")
}

fn secrets_of(request: &Request) -> Vec<&str> {
    request
        .headers
        .iter()
        .filter(|(name, _)| is_secret_header(name))
        .map(|(_, value)| value.strip_prefix("Bearer ").unwrap_or(value))
        .filter(|value| !value.is_empty())
        .collect()
}

fn is_textual(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("json") || ct.starts_with("text/") || ct.contains("xml")
    })
}

/// Map a reqwest failure onto the transport error classes
fn classify(err: reqwest::Error, verify_tls: bool) -> TransportError {
    // The URL is in the request log already and may contain any text
    let err = err.without_url();
    let detail = error_chain(&err);

    if err.is_timeout() {
        TransportError::Timeout(detail)
    } else if is_tls_failure(&err) {
        TransportError::Tls {
            message: detail,
            verification_disabled: !verify_tls,
        }
    } else if err.is_builder() {
        TransportError::InvalidRequest(detail)
    } else {
        TransportError::Connect(detail)
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        source = inner.source();
    }
    parts.join(": ")
}

/// Whether a `rustls::Error` sits anywhere in the source chain
///
/// The handshake reports through `io::Error`, whose `source()` skips the
/// wrapped error, so each `io::Error` is opened with `get_ref`.
fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(inner) = current {
        if inner.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|wrapped| is_tls_failure(wrapped)) {
                return true;
            }
        }
        current = inner.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        assert!(Transport::with_defaults().is_ok());
    }

    #[derive(Debug)]
    struct Wrapped(Box<dyn StdError + Send + Sync>);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "client error (Connect)")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&*self.0)
        }
    }

    #[test]
    fn test_tls_failure_detection() {
        let handshake = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(is_tls_failure(&Wrapped(Box::new(handshake))));
        assert!(is_tls_failure(&rustls::Error::HandshakeNotComplete));

        // Words in the message do not matter, only the error type
        let refused = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "tcp connect error to ssl-gateway: certificate tls handshake",
        );
        assert!(!is_tls_failure(&Wrapped(Box::new(refused))));
    }

    #[test]
    fn test_secrets_of_request() {
        let url = Url::parse("https://cloud.example.org/").unwrap();
        let request = Request::new(Method::GET, url)
            .header("x-auth-token", "tok3n")
            .header("Authorization", "Bearer other")
            .header("Accept", "application/json");
        assert_eq!(secrets_of(&request), vec!["tok3n", "other"]);
    }

    #[test]
    fn test_textual_content_types() {
        assert!(is_textual(Some("application/json; charset=utf-8")));
        assert!(is_textual(Some("text/plain")));
        assert!(!is_textual(Some("application/octet-stream")));
        assert!(!is_textual(None));
    }

    #[test]
    fn test_raw_response_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-object-meta-color", HeaderValue::from_static("blue"));
        headers.insert("x-object-meta-size", HeaderValue::from_static("XL"));
        headers.insert("content-length", HeaderValue::from_static("2"));
        let raw = RawResponse {
            status: 200,
            headers,
            body: Bytes::from_static(b"{]"),
        };

        let meta = raw.headers_with_prefix("X-Object-Meta-");
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["x-object-meta-color"], "blue");

        let err = raw.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::ProtocolError);
        assert_eq!(err.http_status, Some(200));
    }
}
