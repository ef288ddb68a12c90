//! Per-invocation session: transport, credentials and service clients

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nimbus_client::{
    CancellationToken, ComputeClient, Credentials, EndpointResolver, IdentityClient,
    NetworkClient, ServiceCatalog, ServiceClient, ServiceType, StorageClient, Transport,
    TransportConfig, TracingRequestLog, VolumeClient, WaitEngine,
};

use crate::config::Settings;
use crate::output::OutputContext;

pub struct Session {
    pub settings: Settings,
    pub out: OutputContext,
    transport: Transport,
    identity: Option<Arc<IdentityClient>>,
    resolver: EndpointResolver,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(settings: Settings, out: OutputContext) -> Result<Self> {
        let config = TransportConfig {
            verify_tls: settings.verify_tls,
            ..TransportConfig::default()
        };
        let transport = Transport::new(config, Arc::new(TracingRequestLog))
            .context("Failed to create HTTP transport")?;

        let identity = settings
            .auth_url
            .clone()
            .map(|url| Arc::new(IdentityClient::new(transport.clone(), url)));
        let catalog = identity
            .clone()
            .map(|identity| identity as Arc<dyn ServiceCatalog>);
        let resolver = EndpointResolver::new(catalog).with_overrides(settings.services.clone());

        Ok(Self {
            settings,
            out,
            transport,
            identity,
            resolver,
            cancel: CancellationToken::new(),
        })
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let token = self.settings.token.as_deref().context(
            "No token configured (use --token, NIMBUS_TOKEN or `nimbus config set token ...`)",
        )?;
        let credentials = Credentials::new(token);
        Ok(match &self.settings.account {
            Some(account) => credentials.with_account(account),
            None => credentials,
        })
    }

    pub fn identity(&self) -> Result<&IdentityClient> {
        self.identity
            .as_deref()
            .context("No auth URL configured (use --auth-url, NIMBUS_AUTH_URL or `nimbus config set auth_url ...`)")
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Client bound to the resolved endpoint of `service_type`
    pub async fn service(&self, service_type: ServiceType) -> Result<ServiceClient> {
        let credentials = self.credentials()?;
        let endpoint = self
            .resolver
            .resolve(service_type, &credentials)
            .await
            .with_context(|| format!("Cannot locate the {service_type} service"))?;
        Ok(ServiceClient::new(self.transport.clone(), endpoint, credentials)
            .with_retry(self.settings.retry))
    }

    pub async fn compute(&self) -> Result<ComputeClient> {
        Ok(ComputeClient::new(self.service(ServiceType::Compute).await?))
    }

    pub async fn volume(&self) -> Result<VolumeClient> {
        Ok(VolumeClient::new(self.service(ServiceType::Volume).await?))
    }

    pub async fn network(&self) -> Result<NetworkClient> {
        Ok(NetworkClient::new(self.service(ServiceType::Network).await?))
    }

    /// Storage client for the configured account, or the user's own
    pub async fn storage(&self) -> Result<StorageClient> {
        let service = self.service(ServiceType::ObjectStore).await?;
        let account = match &self.settings.account {
            Some(account) => account.clone(),
            None => {
                let credentials = self.credentials()?;
                self.identity()
                    .context("Cannot determine the storage account; set `account`")?
                    .user_info(&credentials)
                    .await?
                    .id
            }
        };
        Ok(StorageClient::with_account(service, account))
    }

    /// Wait engine honouring `timeout` (or the configured one) and Ctrl-C
    pub fn wait_engine(&self, timeout: Option<Duration>) -> WaitEngine {
        let mut options = self.settings.wait.clone();
        if let Some(timeout) = timeout {
            options.timeout = timeout;
        }
        WaitEngine::new(options).with_cancellation(self.cancel.clone())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
