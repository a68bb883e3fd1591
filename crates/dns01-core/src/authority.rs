//! Certificate authority abstraction
//!
//! The authority is an ACME server. Orders and challenges are addressed by
//! order URL and identifier so that callers never hold protocol handles.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Processing => "processing",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Order state as last reported by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSnapshot {
    /// Order location; absent when the authority sent none
    pub url: Option<String>,
    pub status: OrderStatus,
    pub finalize_url: Option<String>,
    pub certificate_url: Option<String>,
    /// Problem document reported with the order, if any
    pub error: Option<String>,
}

impl OrderSnapshot {
    pub fn has_certificate(&self) -> bool {
        self.certificate_url.is_some()
    }
}

/// A dns-01 challenge of an order's authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dns01Challenge {
    pub token: String,
    pub url: String,
    pub status: ChallengeStatus,
}

/// Challenge state as last reported by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeSnapshot {
    pub status: ChallengeStatus,
    pub error: Option<String>,
}

/// Last thing observed from the authority, attached to failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Snapshot {
    Order(OrderSnapshot),
    Challenge(ChallengeSnapshot),
}

impl Snapshot {
    /// Pretty JSON for diagnostics
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl From<OrderSnapshot> for Snapshot {
    fn from(order: OrderSnapshot) -> Self {
        Snapshot::Order(order)
    }
}

impl From<ChallengeSnapshot> for Snapshot {
    fn from(challenge: ChallengeSnapshot) -> Self {
        Snapshot::Challenge(challenge)
    }
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    #[error("No dns-01 challenge for {0} in order")]
    NoChallenge(String),

    #[error("No ACME account loaded")]
    NoAccount,

    #[error("Account error: {0}")]
    Account(String),
}

/// Operations the issuance flow needs from an ACME server
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Terms-of-service URL from the directory, if it lists one
    async fn terms_of_service(&self) -> Result<Option<String>, AuthorityError>;

    /// Register an account for `contact` and return its URL
    async fn new_account(&self, contact: &str) -> Result<String, AuthorityError>;

    /// Load a previously registered account
    async fn use_account(&self, account_url: &str) -> Result<(), AuthorityError>;

    async fn new_order(&self, fqdn: &str) -> Result<OrderSnapshot, AuthorityError>;

    async fn order(&self, order_url: &str) -> Result<OrderSnapshot, AuthorityError>;

    async fn challenge(
        &self,
        order_url: &str,
        fqdn: &str,
    ) -> Result<Dns01Challenge, AuthorityError>;

    /// Value to publish for `token` (base64url SHA-256 of the key authorization)
    fn key_authorization(&self, token: &str) -> Result<String, AuthorityError>;

    /// Tell the authority the challenge record is in place
    async fn validate(&self, order_url: &str, fqdn: &str) -> Result<(), AuthorityError>;

    async fn check_challenge(
        &self,
        order_url: &str,
        fqdn: &str,
    ) -> Result<ChallengeSnapshot, AuthorityError>;

    async fn finalize(
        &self,
        order_url: &str,
        csr_der: &[u8],
    ) -> Result<OrderSnapshot, AuthorityError>;

    /// Download the issued chain as PEM
    async fn certificate(&self, order_url: &str) -> Result<String, AuthorityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_is_lowercase() {
        assert_eq!(OrderStatus::Processing.to_string(), "processing");
        assert_eq!(ChallengeStatus::Invalid.to_string(), "invalid");
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = Snapshot::from(OrderSnapshot {
            url: Some("https://ca.example/order/1".to_string()),
            status: OrderStatus::Ready,
            finalize_url: Some("https://ca.example/order/1/finalize".to_string()),
            certificate_url: None,
            error: None,
        });

        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json()).unwrap();
        assert_eq!(json["kind"], "order");
        assert_eq!(json["status"], "ready");
        assert!(json["certificate_url"].is_null());
    }
}
