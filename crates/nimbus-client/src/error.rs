//! Error types for cloud client operations
//!
//! Every failure the client can observe, whether raised by the transport or
//! returned by a remote service, ends up as exactly one [`ClientError`]. The
//! translation rules live here so they stay total and deterministic.

use std::fmt;

use thiserror::Error;

/// Result type alias for cloud client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Longest error message kept from a response body
const MAX_MESSAGE_CHARS: usize = 512;

/// Closed set of error kinds surfaced by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused, DNS failure, connection reset
    Network,
    /// Certificate or handshake failure
    Tls,
    /// HTTP 401 / 403
    Authentication,
    /// HTTP 404
    NotFound,
    /// HTTP 409
    Conflict,
    /// HTTP 5xx
    ServerError,
    /// Any other HTTP 4xx, or a request that could not be built
    RequestError,
    /// Undecodable body on a success status, or an unexpected status class
    ProtocolError,
    /// No endpoint for the requested service type
    EndpointNotFound,
    /// The request did not complete within the transport deadline
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::Tls => "TLS",
            Self::Authentication => "Authentication",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::ServerError => "ServerError",
            Self::RequestError => "RequestError",
            Self::ProtocolError => "ProtocolError",
            Self::EndpointNotFound => "EndpointNotFound",
            Self::Timeout => "Timeout",
        }
    }

    /// Whether re-issuing the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed cloud operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}{}: {message}", .http_status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct ClientError {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
    pub retryable: bool,
}

impl ClientError {
    /// Create an error whose retryability follows its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestError, message)
    }

    pub fn endpoint_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EndpointNotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Translate an HTTP status and its body into an error.
    ///
    /// Total over every `u16`: a 2xx status here means the caller could not
    /// decode an otherwise successful body, so it maps to `ProtocolError`, as
    /// do the 1xx/3xx classes no service call expects.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Authentication,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            400..=499 => ErrorKind::RequestError,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::ProtocolError,
        };

        let message = if (200..300).contains(&status) {
            format!("malformed response body (HTTP {status})")
        } else {
            extract_message(status, body)
        };

        Self::new(kind, message).with_status(status)
    }
}

/// Raw transport failure, before translation into a [`ClientError`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset mid-flight
    #[error("connection failed: {0}")]
    Connect(String),

    /// Certificate or handshake failure
    #[error("TLS failure: {message}")]
    Tls {
        message: String,
        verification_disabled: bool,
    },

    /// Request deadline exceeded
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The request could not be built (bad header, bad URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(msg) => ClientError::network(msg),
            TransportError::Tls {
                message,
                verification_disabled,
            } => ClientError {
                kind: ErrorKind::Tls,
                http_status: None,
                message,
                retryable: verification_disabled,
            },
            TransportError::Timeout(msg) => ClientError::timeout(msg),
            TransportError::InvalidRequest(msg) => ClientError::request(msg),
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::request(format!("invalid URL: {err}"))
    }
}

/// Pull a human readable message out of an error body.
///
/// Understands the common service error envelopes, e.g.
/// `{"itemNotFound": {"message": "...", "code": 404}}`, then falls back to
/// the body text, the reason phrase and finally `HTTP <status>`.
fn extract_message(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(message) = json_message(&value) {
            return clip(message);
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return clip(text);
    }

    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

fn json_message(value: &serde_json::Value) -> Option<&str> {
    let map = value.as_object()?;
    for key in ["message", "error", "description"] {
        if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
            return Some(text);
        }
    }
    map.values().find_map(|inner| {
        inner
            .get("message")
            .or_else(|| inner.get("details"))
            .and_then(|v| v.as_str())
    })
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        clipped.push_str("...");
        clipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, ErrorKind::Authentication, false),
            (403, ErrorKind::Authentication, false),
            (404, ErrorKind::NotFound, false),
            (409, ErrorKind::Conflict, false),
            (400, ErrorKind::RequestError, false),
            (413, ErrorKind::RequestError, false),
            (500, ErrorKind::ServerError, true),
            (503, ErrorKind::ServerError, true),
            (200, ErrorKind::ProtocolError, false),
            (302, ErrorKind::ProtocolError, false),
            (100, ErrorKind::ProtocolError, false),
            (0, ErrorKind::ProtocolError, false),
            (999, ErrorKind::ProtocolError, false),
        ];

        for (status, kind, retryable) in cases {
            let err = ClientError::from_status(status, b"");
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.retryable, retryable, "status {status}");
            assert_eq!(err.http_status, Some(status));
        }
    }

    #[test]
    fn test_translation_is_deterministic() {
        let body = br#"{"badRequest": {"message": "Invalid flavor", "code": 400}}"#;
        let first = ClientError::from_status(400, body);
        let second = ClientError::from_status(400, body);
        assert_eq!(first, second);
        assert_eq!(first.message, "Invalid flavor");
    }

    #[test]
    fn test_message_from_envelopes() {
        let err = ClientError::from_status(
            404,
            br#"{"itemNotFound": {"message": "Server 42 not found", "code": 404}}"#,
        );
        assert_eq!(err.message, "Server 42 not found");

        let err = ClientError::from_status(500, br#"{"error": "boom"}"#);
        assert_eq!(err.message, "boom");

        let err = ClientError::from_status(409, b"Container is not empty\n");
        assert_eq!(err.message, "Container is not empty");
    }

    #[test]
    fn test_message_falls_back_to_reason() {
        let err = ClientError::from_status(503, b"   ");
        assert_eq!(err.message, "Service Unavailable");

        let err = ClientError::from_status(599, b"");
        assert_eq!(err.message, "HTTP 599");
    }

    #[test]
    fn test_undecodable_body_does_not_fail_translation() {
        let err = ClientError::from_status(502, &[0xff, 0xfe, b'o', b'k', 0xc3]);
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert!(err.message.contains("ok"));
    }

    #[test]
    fn test_long_message_is_clipped_on_char_boundary() {
        let body = "ü".repeat(MAX_MESSAGE_CHARS + 10);
        let err = ClientError::from_status(400, body.as_bytes());
        assert_eq!(err.message.chars().count(), MAX_MESSAGE_CHARS + 3);
    }

    #[test]
    fn test_transport_translation() {
        let err: ClientError = TransportError::Connect("refused".into()).into();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);

        let err: ClientError = TransportError::Tls {
            message: "unknown issuer".into(),
            verification_disabled: false,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Tls);
        assert!(!err.retryable);

        let err: ClientError = TransportError::Tls {
            message: "handshake".into(),
            verification_disabled: true,
        }
        .into();
        assert!(err.retryable);

        let err: ClientError = TransportError::Timeout("30s".into()).into();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(!err.retryable);
    }

    #[test]
    fn test_display() {
        let err = ClientError::from_status(404, b"gone");
        assert_eq!(err.to_string(), "NotFound (404): gone");

        let err = ClientError::network("connection refused");
        assert_eq!(err.to_string(), "Network: connection refused");
    }
}
