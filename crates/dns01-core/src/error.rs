//! Issuance errors

use std::fmt;

use thiserror::Error;

use crate::authority::{AuthorityError, ChallengeStatus, OrderStatus, Snapshot};
use crate::prompt::PromptError;
use crate::provider::ProviderError;
use crate::state::StateError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Configuration error: {0}")]
    Config(#[from] StateError),

    #[error("Let's Encrypt requires agreement to their terms of use.")]
    TermsDeclined,

    #[error("A contact email address is required.")]
    ContactRequired,

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("{message}")]
    OrderCreation {
        message: String,
        snapshot: Option<Snapshot>,
    },

    #[error("Challenge status is {status} not valid.")]
    Challenge {
        status: ChallengeStatus,
        snapshot: Option<Snapshot>,
    },

    #[error("Timed out waiting for validation after {attempts} attempts.")]
    ValidationTimeout {
        attempts: u32,
        snapshot: Option<Snapshot>,
    },

    #[error("{reason}")]
    FinalizeNotReady {
        reason: String,
        snapshot: Option<Snapshot>,
    },

    #[error("Order became invalid while finalizing.")]
    FinalizeFailed { snapshot: Option<Snapshot> },

    #[error("Timed out waiting for the certificate after {attempts} attempts (order is {status}).")]
    FinalizeTimeout {
        attempts: u32,
        status: OrderStatus,
        snapshot: Option<Snapshot>,
    },

    #[error("{reason}")]
    CertificateMissing {
        reason: String,
        snapshot: Option<Snapshot>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("Cancelled")]
    Cancelled,
}

impl IssueError {
    /// Last order or challenge state seen before the failure
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            IssueError::OrderCreation { snapshot, .. }
            | IssueError::Challenge { snapshot, .. }
            | IssueError::ValidationTimeout { snapshot, .. }
            | IssueError::FinalizeNotReady { snapshot, .. }
            | IssueError::FinalizeFailed { snapshot }
            | IssueError::FinalizeTimeout { snapshot, .. }
            | IssueError::CertificateMissing { snapshot, .. } => snapshot.as_ref(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            IssueError::Cancelled | IssueError::Provider(ProviderError::Cancelled)
        )
    }
}

/// Stage of the issuance flow, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Initialization,
    OrderCreation,
    Challenge,
    Validation,
    Finalize,
    SaveCertificate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Initialization => "Initialization",
            Step::OrderCreation => "Order creation",
            Step::Challenge => "Challenge",
            Step::Validation => "Validation",
            Step::Finalize => "Finalize",
            Step::SaveCertificate => "Save certificate",
        };
        f.write_str(s)
    }
}

/// An [`IssueError`] together with the step it happened in
#[derive(Debug, Error)]
#[error("{step} failed: {error}")]
pub struct IssueFailure {
    pub step: Step,
    #[source]
    pub error: IssueError,
}

impl IssueFailure {
    pub fn new(step: Step, error: impl Into<IssueError>) -> Self {
        Self {
            step,
            error: error.into(),
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.error.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ChallengeSnapshot;

    #[test]
    fn test_failure_message_names_step() {
        let failure = IssueFailure::new(
            Step::Validation,
            IssueError::Challenge {
                status: ChallengeStatus::Invalid,
                snapshot: None,
            },
        );
        assert_eq!(
            failure.to_string(),
            "Validation failed: Challenge status is invalid not valid."
        );
    }

    #[test]
    fn test_snapshot_is_exposed() {
        let snapshot = Snapshot::Challenge(ChallengeSnapshot {
            status: ChallengeStatus::Pending,
            error: None,
        });
        let err = IssueError::ValidationTimeout {
            attempts: 60,
            snapshot: Some(snapshot.clone()),
        };
        assert_eq!(err.snapshot(), Some(&snapshot));
        assert!(IssueError::TermsDeclined.snapshot().is_none());
    }

    #[test]
    fn test_provider_errors_convert() {
        let err: IssueError = ProviderError::ManualAbort.into();
        assert_eq!(err.to_string(), "Manual creation of DNS records aborted.");
        assert!(IssueError::from(ProviderError::Cancelled).is_cancelled());
    }
}
