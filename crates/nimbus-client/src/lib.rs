//! Nimbus Client Library
//!
//! Typed access to a multi-service cloud platform (compute, volumes,
//! networks, object storage and identity) over HTTP(S), plus a wait engine
//! that polls asynchronously-transitioning resources until they settle.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nimbus_client::{
//!     status_is, ComputeClient, CreateServer, Credentials, EndpointResolver, IdentityClient,
//!     ServiceClient, ServiceType, Transport, WaitEngine, WaitOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Transport::with_defaults()?;
//!     let credentials = Credentials::new("my-token");
//!     let identity = IdentityClient::new(transport.clone(), "https://cloud.example.org/identity/v2.0".parse()?);
//!     let resolver = EndpointResolver::new(Some(Arc::new(identity)));
//!
//!     let endpoint = resolver.resolve(ServiceType::Compute, &credentials).await?;
//!     let compute = ComputeClient::new(ServiceClient::new(transport, endpoint, credentials));
//!
//!     let server = compute
//!         .create_server(&CreateServer {
//!             name: "web-1".into(),
//!             flavor_id: "1".into(),
//!             image_id: "debian".into(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     // Block until the server is up, fails, or five minutes pass
//!     let outcome = WaitEngine::new(WaitOptions::default())
//!         .wait_until(&compute, &server.id, status_is("ACTIVE"), status_is("ERROR"))
//!         .await?;
//!     println!("{}", outcome.result);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module serves an axum router as a mock cloud:
//!
//! ```rust,ignore
//! use nimbus_client::testing::MockCloud;
//!
//! let cloud = MockCloud::start(router).await?;
//! let compute = ComputeClient::new(cloud.service(ServiceType::Compute, "/compute/"));
//! ```

mod credentials;
pub mod encoding;
mod endpoint;
mod error;
pub mod logging;
mod retry;
mod services;
pub mod testing;
mod transport;
pub mod wait;

pub use credentials::{Credentials, CredentialsId};
pub use endpoint::{Endpoint, EndpointResolver, ServiceCatalog, ServiceOverride, ServiceType};
pub use error::{ClientError, ErrorKind, Result, TransportError};
pub use logging::{LogRecord, MemoryRequestLog, RequestLog, TracingRequestLog};
pub use retry::RetryPolicy;
pub use services::*;
pub use transport::{RawResponse, Request, Transport, TransportConfig, AUTH_TOKEN_HEADER};

// Re-export the wait surface for convenience
pub use wait::{
    never, status_in, status_is, MissingAs, StatusSnapshot, StatusSource, WaitEngine, WaitOptions,
    WaitOutcome, WaitResult, WaitState,
};

// Re-export the cancellation token waits accept
pub use tokio_util::sync::CancellationToken;
