//! High-level Rust SDK built on top of the protocol client.
//!
//! Adds environment-driven construction and the "log in again and retry once"
//! policy that the protocol client deliberately leaves to its callers.
use std::future::Future;
use std::sync::Arc;

use micloud::config::ConfigError;
use micloud::{
    ActionResult, ClientConfig, ClientError, Credentials, Device, LoginOutcome, MiCloudClient,
    PropertyMapping, PropertyResult, ReqwestTransportFactory, TransportFactory,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// SDK errors keep configuration problems apart from protocol failures.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SdkError {
    pub fn two_factor_url(&self) -> Option<&str> {
        match self {
            SdkError::Client(ClientError::TwoFactorRequired(url)) => Some(url.as_str()),
            _ => None,
        }
    }
}

/// Shared handle over an authenticated [`MiCloudClient`].
#[derive(Clone)]
pub struct MiCloudSdkClient {
    inner: Arc<MiCloudClient>,
}

impl MiCloudSdkClient {
    /// Logs in over `reqwest`.
    pub async fn connect(credentials: Credentials, config: ClientConfig) -> Result<Self, SdkError> {
        Self::connect_with(credentials, config, Arc::new(ReqwestTransportFactory)).await
    }

    /// Logs in with a caller-provided transport factory.
    pub async fn connect_with(
        credentials: Credentials,
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, SdkError> {
        let inner = MiCloudClient::connect(credentials, Arc::new(config), factory).await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Reads credentials and settings from `MICLOUD_*` variables and logs in.
    pub async fn from_env() -> Result<Self, SdkError> {
        let credentials = Credentials::from_env()?;
        let config = ClientConfig::from_env()?;
        Self::connect(credentials, config).await
    }

    pub fn client(&self) -> Arc<MiCloudClient> {
        self.inner.clone()
    }

    /// Runs `op`; if it fails the way an expired session does, logs in again
    /// and runs it exactly once more.
    pub async fn with_relogin<T, F, Fut>(&self, op: F) -> Result<T, SdkError>
    where
        F: Fn(Arc<MiCloudClient>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        match op(self.inner.clone()).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_session_suspect() || matches!(err, ClientError::NotAuthenticated) => {
                warn!("call failed ({}), logging in again", err);
                match self.inner.login().await.map_err(ClientError::from)? {
                    LoginOutcome::Authenticated(_) => info!("session renewed"),
                    LoginOutcome::TwoFactor(challenge) => {
                        return Err(ClientError::TwoFactorRequired(challenge.notification_url).into())
                    }
                }
                Ok(op(self.inner.clone()).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_devices(&self) -> Result<Vec<Device>, SdkError> {
        self.with_relogin(|client| async move { client.get_devices().await })
            .await
    }

    pub async fn get_property(&self, did: &str, siid: u32, piid: u32) -> Result<Value, SdkError> {
        self.with_relogin(|client| {
            let did = did.to_string();
            async move { client.get_property(&did, siid, piid).await }
        })
        .await
    }

    pub async fn get_properties(
        &self,
        did: &str,
        mapping: &PropertyMapping,
    ) -> Result<Vec<PropertyResult>, SdkError> {
        self.with_relogin(|client| {
            let did = did.to_string();
            let mapping = mapping.clone();
            async move { client.get_properties(&did, &mapping).await }
        })
        .await
    }

    pub async fn set_property(
        &self,
        did: &str,
        siid: u32,
        piid: u32,
        value: Value,
    ) -> Result<bool, SdkError> {
        self.with_relogin(|client| {
            let did = did.to_string();
            let value = value.clone();
            async move { client.set_property(&did, siid, piid, value).await }
        })
        .await
    }

    pub async fn call_action(
        &self,
        did: &str,
        siid: u32,
        aiid: u32,
        input: Vec<Value>,
    ) -> Result<ActionResult, SdkError> {
        self.with_relogin(|client| {
            let did = did.to_string();
            let input = input.clone();
            async move { client.call_action(&did, siid, aiid, input, Vec::new()).await }
        })
        .await
    }
}
