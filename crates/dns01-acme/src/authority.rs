use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dns01_core::{
    write_private, AuthorityError, CertificateAuthority, ChallengeSnapshot, ChallengeStatus,
    Dns01Challenge, OrderSnapshot, OrderStatus,
};
use instant_acme::{
    Account, AccountCredentials, ChallengeType, Identifier, LetsEncrypt, NewAccount, NewOrder,
    Order, OrderState,
};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// File holding the account key and URL
pub const ACCOUNT_FILE: &str = "account.json";

/// ACME directory to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directory {
    Production,
    Staging,
    Custom(String),
}

impl Directory {
    pub fn url(&self) -> &str {
        match self {
            Directory::Production => LetsEncrypt::Production.url(),
            Directory::Staging => LetsEncrypt::Staging.url(),
            Directory::Custom(url) => url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryDocument {
    #[serde(default)]
    meta: Option<DirectoryMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryMeta {
    terms_of_service: Option<String>,
}

/// State of the dns-01 challenge of one authorization
struct ChallengeView {
    token: String,
    url: String,
    status: ChallengeStatus,
    error: Option<String>,
}

/// [`CertificateAuthority`] backed by `instant-acme`
///
/// Order handles are kept per order URL for the lifetime of the authority;
/// an unknown URL is restored from the server.
pub struct AcmeAuthority {
    directory: Directory,
    credentials_path: PathBuf,
    http: reqwest::Client,
    account: RwLock<Option<Account>>,
    orders: Mutex<HashMap<String, Order>>,
    dns_values: parking_lot::Mutex<HashMap<String, String>>,
}

impl AcmeAuthority {
    /// Authority whose account credentials live in `data_dir`
    pub fn new(directory: Directory, data_dir: impl AsRef<Path>) -> Self {
        Self {
            directory,
            credentials_path: data_dir.as_ref().join(ACCOUNT_FILE),
            http: reqwest::Client::new(),
            account: RwLock::new(None),
            orders: Mutex::new(HashMap::new()),
            dns_values: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    fn save_credentials(&self, credentials: &AccountCredentials) -> Result<(), AuthorityError> {
        let json = serde_json::to_string_pretty(credentials).map_err(|e| {
            AuthorityError::Account(format!("Failed to serialize credentials: {}", e))
        })?;

        if let Some(parent) = self.credentials_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthorityError::Account(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        write_private(&self.credentials_path, json).map_err(|e| {
            AuthorityError::Account(format!(
                "Failed to write {}: {}",
                self.credentials_path.display(),
                e
            ))
        })
    }

    fn load_credentials(&self, account_url: &str) -> Result<AccountCredentials, AuthorityError> {
        let json = match std::fs::read_to_string(&self.credentials_path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthorityError::Account(format!(
                    "No stored credentials for account {} (expected {})",
                    account_url,
                    self.credentials_path.display()
                )));
            }
            Err(e) => {
                return Err(AuthorityError::Account(format!(
                    "Failed to read {}: {}",
                    self.credentials_path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&json)
            .map_err(|e| AuthorityError::Account(format!("Failed to parse credentials: {}", e)))
    }

    async fn account(&self) -> Result<Account, AuthorityError> {
        self.account
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(AuthorityError::NoAccount)
    }

    /// Handle for the order at `order_url`, restored from the server if unknown
    async fn order_handle<'a>(
        &self,
        orders: &'a mut HashMap<String, Order>,
        order_url: &str,
    ) -> Result<&'a mut Order, AuthorityError> {
        if !orders.contains_key(order_url) {
            debug!(order = %order_url, "Restoring order");
            let account = self.account().await?;
            let order = account
                .order(order_url.to_string())
                .await
                .map_err(protocol)?;
            orders.insert(order_url.to_string(), order);
        }
        orders
            .get_mut(order_url)
            .ok_or_else(|| AuthorityError::Protocol(format!("Unknown order {}", order_url)))
    }

    /// Find the dns-01 challenge for `fqdn`, marking it ready when asked
    async fn dns01(
        &self,
        order_url: &str,
        fqdn: &str,
        set_ready: bool,
    ) -> Result<ChallengeView, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let order = self.order_handle(&mut orders, order_url).await?;
        let wanted = fqdn.strip_prefix("*.").unwrap_or(fqdn);

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(protocol)?;

            let matches = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.eq_ignore_ascii_case(wanted),
                _ => false,
            };
            if !matches {
                continue;
            }

            let mut challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AuthorityError::NoChallenge(fqdn.to_string()))?;

            self.dns_values.lock().insert(
                challenge.token.clone(),
                challenge.key_authorization().dns_value(),
            );

            if set_ready {
                challenge.set_ready().await.map_err(protocol)?;
            }

            return Ok(ChallengeView {
                token: challenge.token.clone(),
                url: challenge.url.clone(),
                status: challenge_status(&challenge.status),
                error: challenge.error.as_ref().map(|p| p.to_string()),
            });
        }

        Err(AuthorityError::NoChallenge(fqdn.to_string()))
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn terms_of_service(&self) -> Result<Option<String>, AuthorityError> {
        let document: DirectoryDocument = self
            .http
            .get(self.directory.url())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthorityError::Protocol(format!("Failed to fetch directory: {}", e)))?
            .json()
            .await
            .map_err(|e| AuthorityError::Protocol(format!("Invalid directory document: {}", e)))?;

        Ok(document.meta.and_then(|m| m.terms_of_service))
    }

    async fn new_account(&self, contact: &str) -> Result<String, AuthorityError> {
        info!(directory = %self.directory.url(), "Creating new ACME account");

        let mailto = format!("mailto:{}", contact);
        let (account, credentials) = Account::builder()
            .map_err(|e| AuthorityError::Account(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &[&mailto],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory.url().to_owned(),
                None,
            )
            .await
            .map_err(|e| AuthorityError::Account(e.to_string()))?;

        self.save_credentials(&credentials)?;

        let url = account.id().to_string();
        *self.account.write().await = Some(account);
        Ok(url)
    }

    async fn use_account(&self, account_url: &str) -> Result<(), AuthorityError> {
        let credentials = self.load_credentials(account_url)?;
        let account = Account::builder()
            .map_err(|e| AuthorityError::Account(e.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|e| AuthorityError::Account(e.to_string()))?;

        if account.id() != account_url {
            return Err(AuthorityError::Account(format!(
                "{} holds credentials for {}, not {}",
                self.credentials_path.display(),
                account.id(),
                account_url
            )));
        }

        *self.account.write().await = Some(account);
        Ok(())
    }

    async fn new_order(&self, fqdn: &str) -> Result<OrderSnapshot, AuthorityError> {
        let account = self.account().await?;
        let identifiers = [Identifier::Dns(fqdn.to_string())];
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(protocol)?;

        let url = order.url().to_string();
        let snapshot = order_snapshot(Some(url.clone()), order.state());
        self.orders.lock().await.insert(url, order);
        Ok(snapshot)
    }

    async fn order(&self, order_url: &str) -> Result<OrderSnapshot, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let order = self.order_handle(&mut orders, order_url).await?;
        let state = order.refresh().await.map_err(protocol)?;
        Ok(order_snapshot(Some(order_url.to_string()), state))
    }

    async fn challenge(
        &self,
        order_url: &str,
        fqdn: &str,
    ) -> Result<Dns01Challenge, AuthorityError> {
        let view = self.dns01(order_url, fqdn, false).await?;
        Ok(Dns01Challenge {
            token: view.token,
            url: view.url,
            status: view.status,
        })
    }

    fn key_authorization(&self, token: &str) -> Result<String, AuthorityError> {
        self.dns_values
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| AuthorityError::Protocol(format!("Unknown challenge token {}", token)))
    }

    async fn validate(&self, order_url: &str, fqdn: &str) -> Result<(), AuthorityError> {
        self.dns01(order_url, fqdn, true).await?;
        debug!(order = %order_url, fqdn, "Challenge marked ready");
        Ok(())
    }

    async fn check_challenge(
        &self,
        order_url: &str,
        fqdn: &str,
    ) -> Result<ChallengeSnapshot, AuthorityError> {
        let view = self.dns01(order_url, fqdn, false).await?;
        Ok(ChallengeSnapshot {
            status: view.status,
            error: view.error,
        })
    }

    async fn finalize(
        &self,
        order_url: &str,
        csr_der: &[u8],
    ) -> Result<OrderSnapshot, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let order = self.order_handle(&mut orders, order_url).await?;
        order.finalize_csr(csr_der).await.map_err(protocol)?;
        Ok(order_snapshot(Some(order_url.to_string()), order.state()))
    }

    async fn certificate(&self, order_url: &str) -> Result<String, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let order = self.order_handle(&mut orders, order_url).await?;
        order
            .certificate()
            .await
            .map_err(protocol)?
            .ok_or_else(|| {
                AuthorityError::Protocol(format!("Order {} has no certificate yet", order_url))
            })
    }
}

fn protocol(e: instant_acme::Error) -> AuthorityError {
    AuthorityError::Protocol(e.to_string())
}

fn order_snapshot(url: Option<String>, state: &OrderState) -> OrderSnapshot {
    OrderSnapshot {
        url,
        status: order_status(&state.status),
        finalize_url: Some(state.finalize.clone()).filter(|f| !f.is_empty()),
        certificate_url: state.certificate.clone(),
        error: state.error.as_ref().map(|p| p.to_string()),
    }
}

fn order_status(status: &instant_acme::OrderStatus) -> OrderStatus {
    match status {
        instant_acme::OrderStatus::Pending => OrderStatus::Pending,
        instant_acme::OrderStatus::Ready => OrderStatus::Ready,
        instant_acme::OrderStatus::Processing => OrderStatus::Processing,
        instant_acme::OrderStatus::Valid => OrderStatus::Valid,
        instant_acme::OrderStatus::Invalid => OrderStatus::Invalid,
    }
}

fn challenge_status(status: &instant_acme::ChallengeStatus) -> ChallengeStatus {
    match status {
        instant_acme::ChallengeStatus::Pending => ChallengeStatus::Pending,
        instant_acme::ChallengeStatus::Processing => ChallengeStatus::Processing,
        instant_acme::ChallengeStatus::Valid => ChallengeStatus::Valid,
        instant_acme::ChallengeStatus::Invalid => ChallengeStatus::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_urls() {
        assert_eq!(
            Directory::Production.url(),
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            Directory::Staging.url(),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            Directory::Custom("https://localhost:14000/dir".to_string()).url(),
            "https://localhost:14000/dir"
        );
    }

    #[test]
    fn test_credentials_live_in_data_dir() {
        let authority = AcmeAuthority::new(Directory::Staging, "/var/lib/dns01");
        assert_eq!(
            authority.credentials_path(),
            Path::new("/var/lib/dns01/account.json")
        );
    }

    #[test]
    fn test_directory_meta() {
        let document: DirectoryDocument = serde_json::from_str(
            r#"{
                "newNonce": "https://ca.example/new-nonce",
                "meta": {"termsOfService": "https://ca.example/tos.pdf", "website": "https://ca.example"}
            }"#,
        )
        .unwrap();
        assert_eq!(
            document.meta.and_then(|m| m.terms_of_service).as_deref(),
            Some("https://ca.example/tos.pdf")
        );

        let document: DirectoryDocument = serde_json::from_str(r#"{"newNonce": "x"}"#).unwrap();
        assert!(document.meta.is_none());
    }

    #[test]
    fn test_unknown_token_is_error() {
        let authority = AcmeAuthority::new(Directory::Staging, "/tmp");
        assert!(matches!(
            authority.key_authorization("nope"),
            Err(AuthorityError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_requires_account() {
        let authority = AcmeAuthority::new(Directory::Staging, "/tmp");
        let err = authority.new_order("example.com").await.unwrap_err();
        assert!(matches!(err, AuthorityError::NoAccount));
    }

    #[tokio::test]
    async fn test_missing_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let authority = AcmeAuthority::new(Directory::Staging, dir.path());
        let err = authority
            .use_account("https://ca.example/acct/1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No stored credentials"));
    }
}
