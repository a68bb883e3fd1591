//! Issuance flow
//!
//! Drives one certificate from account setup to files on disk:
//!
//! ```text
//! Uninitialized -> AccountReady -> OrderOpen -> ChallengeFulfilled
//!               -> Validated -> Finalized -> CertificateSaved
//! ```
//!
//! An order that already carries a certificate jumps from `OrderOpen`
//! straight to saving.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authority::{
    CertificateAuthority, ChallengeSnapshot, ChallengeStatus, OrderSnapshot, OrderStatus, Snapshot,
};
use crate::error::{IssueError, IssueFailure, Step};
use crate::poll::{poll_until, Attempt, Poll, PollError};
use crate::prompt::{blocking, PromptError, Prompter};
use crate::provider::DnsProvider;
use crate::state::{is_plausible_email, StateFile};
use crate::storage::{build_csr, CertificateStore, SavedFiles};
use crate::target::Target;

/// Where a run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssuanceState {
    Uninitialized,
    AccountReady,
    OrderOpen,
    ChallengeFulfilled,
    Validated,
    Finalized,
    CertificateSaved,
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssuanceState::Uninitialized => "uninitialized",
            IssuanceState::AccountReady => "account-ready",
            IssuanceState::OrderOpen => "order-open",
            IssuanceState::ChallengeFulfilled => "challenge-fulfilled",
            IssuanceState::Validated => "validated",
            IssuanceState::Finalized => "finalized",
            IssuanceState::CertificateSaved => "certificate-saved",
        };
        f.write_str(s)
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct Issued {
    pub order_url: String,
    /// The order already had a certificate; no challenge was run
    pub reused_order: bool,
    pub files: SavedFiles,
}

/// Runs the issuance flow for one target
pub struct Issuer {
    target: Target,
    authority: Arc<dyn CertificateAuthority>,
    provider: Arc<dyn DnsProvider>,
    prompter: Arc<dyn Prompter>,
    state: StateFile,
    store: CertificateStore,
    poll: Poll,
    cancel: CancellationToken,
    status: IssuanceState,
}

impl Issuer {
    pub fn new(
        target: Target,
        authority: Arc<dyn CertificateAuthority>,
        provider: Arc<dyn DnsProvider>,
        prompter: Arc<dyn Prompter>,
        state: StateFile,
        store: CertificateStore,
    ) -> Self {
        Self {
            target,
            authority,
            provider,
            prompter,
            state,
            store,
            poll: Poll::default(),
            cancel: CancellationToken::new(),
            status: IssuanceState::Uninitialized,
        }
    }

    /// Policy for validation and finalize polling
    pub fn with_poll(mut self, poll: Poll) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status(&self) -> IssuanceState {
        self.status
    }

    pub async fn run(&mut self) -> Result<Issued, IssueFailure> {
        self.initialize()
            .await
            .map_err(|e| IssueFailure::new(Step::Initialization, e))?;
        self.advance(IssuanceState::AccountReady);

        let order = self
            .open_order()
            .await
            .map_err(|e| IssueFailure::new(Step::OrderCreation, e))?;
        let order_url = order.url.clone().unwrap_or_default();
        self.advance(IssuanceState::OrderOpen);

        let reused_order = order.has_certificate();
        let order = if reused_order {
            info!(order = %order_url, "Order already has a certificate");
            order
        } else {
            self.fulfill_challenge(&order_url)
                .await
                .map_err(|e| IssueFailure::new(Step::Challenge, e))?;
            self.advance(IssuanceState::ChallengeFulfilled);

            self.wait_for_validation(&order_url)
                .await
                .map_err(|e| IssueFailure::new(Step::Validation, e))?;
            self.advance(IssuanceState::Validated);

            let order = self
                .finalize(&order_url)
                .await
                .map_err(|e| IssueFailure::new(Step::Finalize, e))?;
            self.advance(IssuanceState::Finalized);
            order
        };

        let files = self
            .save_certificate(&order)
            .await
            .map_err(|e| IssueFailure::new(Step::SaveCertificate, e))?;
        self.advance(IssuanceState::CertificateSaved);

        if let Err(e) = self.provider.revoke_challenge(&self.target).await {
            warn!(error = %e, record = %self.target.acme_fqdn(), "Failed to remove challenge record");
        }

        Ok(Issued {
            order_url,
            reused_order,
            files,
        })
    }

    fn advance(&mut self, next: IssuanceState) {
        debug!(from = %self.status, to = %next, "Issuance state change");
        self.status = next;
    }

    async fn initialize(&mut self) -> Result<(), IssueError> {
        self.agree_to_terms().await?;
        let contact = self.contact_address()?;
        self.load_account(&contact).await?;
        self.provider.setup().await?;
        Ok(())
    }

    async fn agree_to_terms(&mut self) -> Result<(), IssueError> {
        if self.state.agreed_terms() {
            return Ok(());
        }

        if let Some(url) = self.authority.terms_of_service().await? {
            self.prompter
                .say(&format!("The Let's Encrypt Terms of Service can be found at:\n  {}", url));
        }

        let agreed = match blocking(|| {
            self.prompter
                .confirm("Do you agree to the Let's Encrypt Terms of Service [y/n]? ")
        }) {
            Ok(agreed) => agreed,
            Err(PromptError::Closed) => false,
            Err(e) => return Err(e.into()),
        };
        if !agreed {
            return Err(IssueError::TermsDeclined);
        }

        self.state.set_agreed_terms(true)?;
        Ok(())
    }

    fn contact_address(&mut self) -> Result<String, IssueError> {
        if let Some(contact) = self.state.contact() {
            return Ok(contact.to_string());
        }

        self.prompter.say(
            "Let's Encrypt requires a contact email address to send updates about\nexpiration and suchlike.",
        );
        loop {
            let answer = match blocking(|| {
                self.prompter.read_line("What email address should they use? ")
            }) {
                Ok(answer) => answer.map(|a| a.trim().to_string()).unwrap_or_default(),
                Err(PromptError::Closed) => String::new(),
                Err(e) => return Err(e.into()),
            };

            if answer.is_empty() {
                return Err(IssueError::ContactRequired);
            }
            if is_plausible_email(&answer) {
                self.state.set_contact(&answer)?;
                return Ok(answer);
            }
            self.prompter
                .say("That doesn't look like a valid email address.");
        }
    }

    async fn load_account(&mut self, contact: &str) -> Result<(), IssueError> {
        if let Some(url) = self.state.account_url() {
            info!(account = %url, "Using existing account");
            self.authority.use_account(url).await?;
            return Ok(());
        }

        let url = self.authority.new_account(contact).await?;
        self.state.set_account_url(&url)?;
        info!(account = %url, "New account created");
        Ok(())
    }

    async fn open_order(&self) -> Result<OrderSnapshot, IssueError> {
        let order = self.authority.new_order(self.target.fqdn()).await?;
        debug!(order = ?order.url, status = %order.status, "Order opened");

        if order.url.is_none() {
            return Err(IssueError::OrderCreation {
                message: "Order has no location.".to_string(),
                snapshot: Some(order.into()),
            });
        }
        if order.status == OrderStatus::Invalid {
            return Err(IssueError::OrderCreation {
                message: "Order is invalid.".to_string(),
                snapshot: Some(order.into()),
            });
        }

        Ok(order)
    }

    async fn fulfill_challenge(&self, order_url: &str) -> Result<(), IssueError> {
        info!("Starting challenge...");
        let fqdn = self.target.fqdn();
        let challenge = self.authority.challenge(order_url, fqdn).await?;

        if challenge.status == ChallengeStatus::Valid {
            info!(fqdn, "Challenge already valid");
            return Ok(());
        }

        let auth_key = self.authority.key_authorization(&challenge.token)?;
        self.provider
            .fulfill_challenge(&self.target, &auth_key, &self.cancel)
            .await?;

        info!("Validating challenge...");
        self.authority.validate(order_url, fqdn).await?;
        Ok(())
    }

    async fn wait_for_validation(&self, order_url: &str) -> Result<ChallengeSnapshot, IssueError> {
        info!("Waiting for validation...");
        let fqdn = self.target.fqdn();
        let authority = &self.authority;
        let last: Mutex<Option<ChallengeSnapshot>> = Mutex::new(None);

        let result = poll_until(self.poll, &self.cancel, |attempt| {
            let last = &last;
            async move {
                let check = match authority.check_challenge(order_url, fqdn).await {
                    Ok(check) => check,
                    Err(e) => return Attempt::Failed(IssueError::from(e)),
                };
                debug!(attempt, status = %check.status, "Challenge status");
                *last.lock() = Some(check.clone());

                match check.status {
                    ChallengeStatus::Valid => Attempt::Ready(check),
                    ChallengeStatus::Pending => Attempt::Pending,
                    status => Attempt::Failed(IssueError::Challenge {
                        status,
                        snapshot: Some(check.into()),
                    }),
                }
            }
        })
        .await;

        match result {
            Ok(check) => {
                info!("Validation done");
                Ok(check)
            }
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Cancelled) => Err(IssueError::Cancelled),
            Err(PollError::Exhausted { attempts }) => Err(IssueError::ValidationTimeout {
                attempts,
                snapshot: last.into_inner().map(Snapshot::from),
            }),
        }
    }

    async fn finalize(&self, order_url: &str) -> Result<OrderSnapshot, IssueError> {
        info!("Finalizing order...");
        // Status moves on after validation, so reload
        let order = self.authority.order(order_url).await?;

        if order.finalize_url.is_none() {
            return Err(IssueError::FinalizeNotReady {
                reason: "Order does not have a finalize URL.".to_string(),
                snapshot: Some(order.into()),
            });
        }
        if order.status != OrderStatus::Ready {
            return Err(IssueError::FinalizeNotReady {
                reason: "Order is not ready to finalize.".to_string(),
                snapshot: Some(order.into()),
            });
        }

        let key = self.store.load_or_create_key(&self.target)?;
        let csr = build_csr(&self.target, &key)?;
        let submitted = self.authority.finalize(order_url, &csr).await?;
        debug!(status = %submitted.status, "Finalize submitted");

        let authority = &self.authority;
        let last = Mutex::new(submitted);

        let result = poll_until(self.poll, &self.cancel, |attempt| {
            let last = &last;
            async move {
                let order = match authority.order(order_url).await {
                    Ok(order) => order,
                    Err(e) => return Attempt::Failed(IssueError::from(e)),
                };
                debug!(attempt, status = %order.status, "Order status");
                *last.lock() = order.clone();

                match order.status {
                    OrderStatus::Valid => Attempt::Ready(order),
                    OrderStatus::Invalid => Attempt::Failed(IssueError::FinalizeFailed {
                        snapshot: Some(order.into()),
                    }),
                    _ => Attempt::Pending,
                }
            }
        })
        .await;

        match result {
            Ok(order) => Ok(order),
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Cancelled) => Err(IssueError::Cancelled),
            Err(PollError::Exhausted { attempts }) => {
                let order = last.into_inner();
                Err(IssueError::FinalizeTimeout {
                    attempts,
                    status: order.status,
                    snapshot: Some(order.into()),
                })
            }
        }
    }

    async fn save_certificate(&self, order: &OrderSnapshot) -> Result<SavedFiles, IssueError> {
        if order.status != OrderStatus::Valid {
            return Err(IssueError::CertificateMissing {
                reason: "Order status is not valid.".to_string(),
                snapshot: Some(order.clone().into()),
            });
        }
        let Some(order_url) = order.url.as_deref().filter(|_| order.has_certificate()) else {
            return Err(IssueError::CertificateMissing {
                reason: "Order does not have a certificate URL.".to_string(),
                snapshot: Some(order.clone().into()),
            });
        };

        let chain = self.authority.certificate(order_url).await?;
        let files = self.store.save(&self.target, &chain)?;
        for path in &files.written {
            info!(path = ?path, "Certificate written");
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(IssuanceState::Uninitialized < IssuanceState::AccountReady);
        assert!(IssuanceState::Validated < IssuanceState::Finalized);
        assert!(IssuanceState::Finalized < IssuanceState::CertificateSaved);
        assert_eq!(IssuanceState::OrderOpen.to_string(), "order-open");
    }
}
