//! DNS provider abstraction
//!
//! A provider publishes the challenge value for a [`Target`] and removes it
//! afterwards. Two strategies exist: [`ManualProvider`] asks the operator to
//! create the record, [`ApiProvider`] drives a hosting control plane and then
//! waits for the record to reach every authoritative nameserver.

mod api;
mod manual;

pub use api::ApiProvider;
pub use manual::ManualProvider;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::control_plane::ControlPlaneError;
use crate::prompt::PromptError;
use crate::target::Target;

/// TTL for published challenge records, in seconds
pub const CHALLENGE_TTL: u32 = 180;

/// Errors from DNS provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to replace record: {0}")]
    DnsWrite(String),

    #[error("Failed to {action} DNS TXT record for {name} on {domain}: {source}")]
    DnsProvider {
        action: &'static str,
        name: String,
        domain: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("Timed out waiting for DNS to propagate to {nameserver} after {attempts} attempts")]
    PropagationTimeout { nameserver: String, attempts: u32 },

    #[error("Manual creation of DNS records aborted.")]
    ManualAbort,

    #[error("{0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Prompt failed: {0}")]
    Prompt(#[from] PromptError),
}

/// Trait for challenge-record publishers
///
/// Implementations must be idempotent: fulfilling twice with the same value
/// leaves a single record.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// One-time preparation before the first challenge
    async fn setup(&self) -> Result<(), ProviderError>;

    /// Publish `auth_key` at the target's challenge name and return once it is visible
    async fn fulfill_challenge(
        &self,
        target: &Target,
        auth_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;

    /// Remove the challenge record
    async fn revoke_challenge(&self, target: &Target) -> Result<(), ProviderError>;
}

/// The available provider strategies
pub enum Provider {
    Manual(ManualProvider),
    Api(ApiProvider),
}

impl Provider {
    pub fn kind(&self) -> &'static str {
        match self {
            Provider::Manual(_) => "manual",
            Provider::Api(_) => "api",
        }
    }
}

#[async_trait]
impl DnsProvider for Provider {
    async fn setup(&self) -> Result<(), ProviderError> {
        match self {
            Provider::Manual(p) => p.setup().await,
            Provider::Api(p) => p.setup().await,
        }
    }

    async fn fulfill_challenge(
        &self,
        target: &Target,
        auth_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        match self {
            Provider::Manual(p) => p.fulfill_challenge(target, auth_key, cancel).await,
            Provider::Api(p) => p.fulfill_challenge(target, auth_key, cancel).await,
        }
    }

    async fn revoke_challenge(&self, target: &Target) -> Result<(), ProviderError> {
        match self {
            Provider::Manual(p) => p.revoke_challenge(target).await,
            Provider::Api(p) => p.revoke_challenge(target).await,
        }
    }
}

impl From<ManualProvider> for Provider {
    fn from(p: ManualProvider) -> Self {
        Provider::Manual(p)
    }
}

impl From<ApiProvider> for Provider {
    fn from(p: ApiProvider) -> Self {
        Provider::Api(p)
    }
}
