//! DNS control-plane abstraction
//!
//! A control plane is a hosting provider's API for editing the records of one
//! domain. Clients are created per domain through a [`ControlPlaneFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// TXT record type name as used by control-plane APIs
pub const TXT: &str = "TXT";

/// A record as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: String,
    pub data: String,
}

/// Result of a replace call the control plane accepted at the transport level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The API refused the change, with its explanation
    Rejected(String),
}

impl ReplaceOutcome {
    /// Build a rejection, substituting a generic message when the API gave none
    pub fn rejected(message: Option<String>) -> Self {
        match message {
            Some(m) if !m.trim().is_empty() => Self::Rejected(m),
            _ => Self::Rejected("Unknown error".to_string()),
        }
    }
}

/// Errors reaching or talking to the control plane
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),
}

/// Record operations on a single domain
#[async_trait]
pub trait DnsControlPlane: Send + Sync {
    /// List records of `record_type` at `name` (relative to the domain)
    ///
    /// `None` means the API returned no list at all.
    async fn list_records(
        &self,
        name: &str,
        record_type: &str,
    ) -> Result<Option<Vec<DnsRecord>>, ControlPlaneError>;

    /// Replace every record of `record_type` at `name` with a single value
    async fn replace_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: u32,
    ) -> Result<ReplaceOutcome, ControlPlaneError>;

    /// Remove one record; `false` when the API refused
    async fn remove_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError>;
}

/// Creates a control-plane client for a domain
pub trait ControlPlaneFactory: Send + Sync {
    fn for_domain(&self, domain: &str) -> Arc<dyn DnsControlPlane>;
}

impl<F> ControlPlaneFactory for F
where
    F: Fn(&str) -> Arc<dyn DnsControlPlane> + Send + Sync,
{
    fn for_domain(&self, domain: &str) -> Arc<dyn DnsControlPlane> {
        self(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_normalizes_missing_message() {
        assert_eq!(
            ReplaceOutcome::rejected(None),
            ReplaceOutcome::Rejected("Unknown error".to_string())
        );
        assert_eq!(
            ReplaceOutcome::rejected(Some("  ".to_string())),
            ReplaceOutcome::Rejected("Unknown error".to_string())
        );
        assert_eq!(
            ReplaceOutcome::rejected(Some("quota".to_string())),
            ReplaceOutcome::Rejected("quota".to_string())
        );
    }
}
