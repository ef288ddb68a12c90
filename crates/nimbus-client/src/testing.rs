//! Test utilities for nimbus-client
//!
//! Provides an in-process mock cloud and a scripted status source.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use url::Url;

use crate::credentials::Credentials;
use crate::endpoint::{Endpoint, ServiceType};
use crate::error::{ClientError, Result};
use crate::logging::MemoryRequestLog;
use crate::services::ServiceClient;
use crate::transport::{Transport, TransportConfig};
use crate::wait::{StatusSnapshot, StatusSource};

/// An axum router served on a random local port, shut down on drop
pub struct MockCloud {
    pub addr: SocketAddr,
    pub log: Arc<MemoryRequestLog>,
    pub transport: Transport,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockCloud {
    /// Serve `router`
    ///
    /// # Example
    ///
    /// ```ignore
    /// use nimbus_client::testing::MockCloud;
    ///
    /// let cloud = MockCloud::start(router).await?;
    /// let compute = ComputeClient::new(cloud.service(ServiceType::Compute, "/compute")?);
    /// ```
    pub async fn start<S>(router: axum::Router<S>) -> Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| ClientError::network(format!("cannot bind mock cloud: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ClientError::network(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let router: axum::Router = router.into();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let log = Arc::new(MemoryRequestLog::new());
        let config = TransportConfig {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..TransportConfig::default()
        };
        let transport = Transport::new(config, log.clone())?;

        Ok(Self {
            addr,
            log,
            transport,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of `path` on the mock cloud
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&self.base_url())
            .and_then(|base| base.join(path))
            .unwrap_or_else(|e| panic!("bad mock path {path}: {e}"))
    }

    /// Credentials every mock service is expected to accept
    pub fn credentials(&self) -> Credentials {
        Credentials::new("mock-token").with_account("mock-user")
    }

    /// A service client rooted at `path`
    pub fn service(&self, service_type: ServiceType, path: &str) -> ServiceClient {
        let endpoint = Endpoint::new(service_type, self.url(path), None);
        ServiceClient::new(self.transport.clone(), Arc::new(endpoint), self.credentials())
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockCloud {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Status source replaying a script; the last entry repeats forever
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<StatusSnapshot>>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<StatusSnapshot>>) -> Self {
        assert!(!script.is_empty(), "script needs at least one entry");
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of `get_status` calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn get_status(&self, _resource_id: &str) -> Result<StatusSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        if script.len() > 1 {
            if let Some(next) = script.pop_front() {
                return next;
            }
        }
        script
            .front()
            .cloned()
            .unwrap_or_else(|| Err(ClientError::protocol("empty status script")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_repeats_last() {
        let source = ScriptedSource::new(vec![
            Ok(StatusSnapshot::new("a", "BUILD")),
            Ok(StatusSnapshot::new("a", "ACTIVE")),
        ]);
        assert_eq!(source.get_status("a").await.unwrap().status, "BUILD");
        assert_eq!(source.get_status("a").await.unwrap().status, "ACTIVE");
        assert_eq!(source.get_status("a").await.unwrap().status, "ACTIVE");
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_cloud_url() {
        let cloud = MockCloud::start(axum::Router::new()).await.unwrap();
        assert!(cloud.url("/compute").as_str().ends_with("/compute"));
        cloud.shutdown().await;
    }
}
