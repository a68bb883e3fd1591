//! Scripted ACME server for E2E tests
//!
//! Statuses handed out by `check_challenge` and by `order` after finalize are
//! taken from queues; the last queued status repeats once the queue runs dry.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dns01_core::{
    AuthorityError, CertificateAuthority, ChallengeSnapshot, ChallengeStatus, Dns01Challenge,
    OrderSnapshot, OrderStatus,
};

use crate::certificates::TestChain;

pub const ORDER_URL: &str = "https://ca.test/acme/order/1";
pub const ACCOUNT_URL: &str = "https://ca.test/acme/acct/1";
pub const TERMS_URL: &str = "https://ca.test/terms.pdf";
pub const TOKEN: &str = "mock-token";
/// Digest published for [`TOKEN`]
pub const DNS_VALUE: &str = "LoqXcYV8q5ONbJQxbmR7SCTNo3tiAXDfowyjxAjEuX0";

const FINALIZE_URL: &str = "https://ca.test/acme/order/1/finalize";
const CERTIFICATE_URL: &str = "https://ca.test/acme/cert/1";

struct Inner {
    terms_url: Option<String>,
    order_url: Option<String>,
    contacts: Vec<String>,
    used_accounts: Vec<String>,
    ordered: Vec<String>,
    initial_status: OrderStatus,
    has_certificate: bool,
    before_finalize: OrderStatus,
    challenge_status: ChallengeStatus,
    challenge_checks: VecDeque<ChallengeStatus>,
    after_finalize: VecDeque<OrderStatus>,
    validated: bool,
    /// The current order has been finalized
    finalized: bool,
    csr: Option<Vec<u8>>,
    certificate_downloads: u32,
}

/// In-memory [`CertificateAuthority`] that records what it was asked
pub struct MockAuthority {
    inner: Mutex<Inner>,
    chain: TestChain,
}

impl MockAuthority {
    /// An authority that validates on the first check and issues on the
    /// first poll after finalize
    pub fn new(hostname: &str) -> Arc<Self> {
        Arc::new(Self::build(hostname))
    }

    fn build(hostname: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                terms_url: Some(TERMS_URL.to_string()),
                order_url: Some(ORDER_URL.to_string()),
                contacts: Vec::new(),
                used_accounts: Vec::new(),
                ordered: Vec::new(),
                initial_status: OrderStatus::Pending,
                has_certificate: false,
                before_finalize: OrderStatus::Ready,
                challenge_status: ChallengeStatus::Pending,
                challenge_checks: VecDeque::from([ChallengeStatus::Valid]),
                after_finalize: VecDeque::from([OrderStatus::Valid]),
                validated: false,
                finalized: false,
                csr: None,
                certificate_downloads: 0,
            }),
            chain: TestChain::generate(hostname),
        }
    }

    /// New orders come back already valid with a certificate
    pub fn with_existing_certificate(self: Arc<Self>) -> Arc<Self> {
        {
            let mut inner = self.inner.lock();
            inner.initial_status = OrderStatus::Valid;
            inner.has_certificate = true;
        }
        self
    }

    /// New orders come back without a location
    pub fn without_order_url(self: Arc<Self>) -> Arc<Self> {
        self.inner.lock().order_url = None;
        self
    }

    pub fn with_initial_order_status(self: Arc<Self>, status: OrderStatus) -> Arc<Self> {
        self.inner.lock().initial_status = status;
        self
    }

    /// Status of the challenge before validation is requested
    pub fn with_challenge_status(self: Arc<Self>, status: ChallengeStatus) -> Arc<Self> {
        self.inner.lock().challenge_status = status;
        self
    }

    /// Statuses returned by successive challenge checks
    pub fn with_challenge_checks(
        self: Arc<Self>,
        statuses: impl IntoIterator<Item = ChallengeStatus>,
    ) -> Arc<Self> {
        self.inner.lock().challenge_checks = statuses.into_iter().collect();
        self
    }

    /// Order status reported when finalize is about to be called
    pub fn with_status_before_finalize(self: Arc<Self>, status: OrderStatus) -> Arc<Self> {
        self.inner.lock().before_finalize = status;
        self
    }

    /// Statuses returned by successive order reloads after finalize
    pub fn with_statuses_after_finalize(
        self: Arc<Self>,
        statuses: impl IntoIterator<Item = OrderStatus>,
    ) -> Arc<Self> {
        self.inner.lock().after_finalize = statuses.into_iter().collect();
        self
    }

    pub fn without_terms(self: Arc<Self>) -> Arc<Self> {
        self.inner.lock().terms_url = None;
        self
    }

    /// Contacts accounts were registered for
    pub fn contacts(&self) -> Vec<String> {
        self.inner.lock().contacts.clone()
    }

    /// Account URLs loaded with `use_account`
    pub fn used_accounts(&self) -> Vec<String> {
        self.inner.lock().used_accounts.clone()
    }

    /// Identifiers orders were opened for
    pub fn ordered(&self) -> Vec<String> {
        self.inner.lock().ordered.clone()
    }

    pub fn was_validated(&self) -> bool {
        self.inner.lock().validated
    }

    /// CSR received on finalize
    pub fn csr(&self) -> Option<Vec<u8>> {
        self.inner.lock().csr.clone()
    }

    pub fn certificate_downloads(&self) -> u32 {
        self.inner.lock().certificate_downloads
    }

    pub fn chain(&self) -> &TestChain {
        &self.chain
    }

    fn snapshot(inner: &Inner, status: OrderStatus) -> OrderSnapshot {
        let issued = inner.has_certificate || status == OrderStatus::Valid;
        OrderSnapshot {
            url: inner.order_url.clone(),
            status,
            finalize_url: Some(FINALIZE_URL.to_string()),
            certificate_url: issued.then(|| CERTIFICATE_URL.to_string()),
            error: None,
        }
    }
}

fn next_status<T: Copy>(queue: &mut VecDeque<T>, fallback: T) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or(fallback)
    } else {
        queue.front().copied().unwrap_or(fallback)
    }
}

#[async_trait]
impl CertificateAuthority for MockAuthority {
    async fn terms_of_service(&self) -> Result<Option<String>, AuthorityError> {
        Ok(self.inner.lock().terms_url.clone())
    }

    async fn new_account(&self, contact: &str) -> Result<String, AuthorityError> {
        self.inner.lock().contacts.push(contact.to_string());
        tracing::debug!("MockAuthority: registered account for {}", contact);
        Ok(ACCOUNT_URL.to_string())
    }

    async fn use_account(&self, account_url: &str) -> Result<(), AuthorityError> {
        self.inner.lock().used_accounts.push(account_url.to_string());
        Ok(())
    }

    async fn new_order(&self, fqdn: &str) -> Result<OrderSnapshot, AuthorityError> {
        let mut inner = self.inner.lock();
        inner.ordered.push(fqdn.to_string());
        inner.finalized = false;
        let status = inner.initial_status;
        Ok(Self::snapshot(&inner, status))
    }

    async fn order(&self, _order_url: &str) -> Result<OrderSnapshot, AuthorityError> {
        let mut inner = self.inner.lock();
        let status = if inner.finalized {
            next_status(&mut inner.after_finalize, OrderStatus::Valid)
        } else {
            inner.before_finalize
        };
        Ok(Self::snapshot(&inner, status))
    }

    async fn challenge(
        &self,
        order_url: &str,
        _fqdn: &str,
    ) -> Result<Dns01Challenge, AuthorityError> {
        Ok(Dns01Challenge {
            token: TOKEN.to_string(),
            url: format!("{}/challenge", order_url),
            status: self.inner.lock().challenge_status,
        })
    }

    fn key_authorization(&self, token: &str) -> Result<String, AuthorityError> {
        if token == TOKEN {
            Ok(DNS_VALUE.to_string())
        } else {
            Err(AuthorityError::Protocol(format!("Unknown token {}", token)))
        }
    }

    async fn validate(&self, _order_url: &str, _fqdn: &str) -> Result<(), AuthorityError> {
        self.inner.lock().validated = true;
        Ok(())
    }

    async fn check_challenge(
        &self,
        _order_url: &str,
        _fqdn: &str,
    ) -> Result<ChallengeSnapshot, AuthorityError> {
        let mut inner = self.inner.lock();
        let status = next_status(&mut inner.challenge_checks, ChallengeStatus::Valid);
        let error = (status == ChallengeStatus::Invalid)
            .then(|| "Incorrect TXT record found at _acme-challenge".to_string());
        Ok(ChallengeSnapshot { status, error })
    }

    async fn finalize(
        &self,
        _order_url: &str,
        csr_der: &[u8],
    ) -> Result<OrderSnapshot, AuthorityError> {
        let mut inner = self.inner.lock();
        inner.csr = Some(csr_der.to_vec());
        inner.finalized = true;
        Ok(Self::snapshot(&inner, OrderStatus::Processing))
    }

    async fn certificate(&self, _order_url: &str) -> Result<String, AuthorityError> {
        self.inner.lock().certificate_downloads += 1;
        Ok(self.chain.chain_pem())
    }
}
