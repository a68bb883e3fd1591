//! DNS-01 certificate issuance
//!
//! This library proves control of a domain by publishing a challenge token as a
//! DNS TXT record, waits for that record to reach the domain's nameservers,
//! and drives an ACME order through validation, finalization and download.
//! Certificate authorities, DNS control planes and operator prompts are
//! consumed through traits so that the binary and tests can plug in their own.

mod authority;
mod control_plane;
mod error;
mod orchestrator;
mod poll;
mod prompt;
mod propagation;
mod provider;
mod psl;
mod state;
mod storage;
mod target;

pub use authority::{
    AuthorityError, CertificateAuthority, ChallengeSnapshot, ChallengeStatus, Dns01Challenge,
    OrderSnapshot, OrderStatus, Snapshot,
};
pub use control_plane::{
    ControlPlaneError, ControlPlaneFactory, DnsControlPlane, DnsRecord, ReplaceOutcome, TXT,
};
pub use error::{IssueError, IssueFailure, Step};
pub use orchestrator::{IssuanceState, Issued, Issuer};
pub use poll::{poll_until, Attempt, Poll, PollError};
pub use prompt::{parse_yes_no, PromptError, Prompter};
pub use propagation::{
    HickoryLookup, PropagationSettings, PropagationVerifier, QueryError, TxtLookup,
};
pub use provider::{ApiProvider, DnsProvider, ManualProvider, Provider, ProviderError, CHALLENGE_TTL};
pub use psl::{PslError, PublicSuffixResolver, StaticSuffixResolver, SuffixResolver, PSL_URL};
pub use state::{is_plausible_email, write_private, AcmeState, State, StateError, StateFile};
pub use storage::{build_csr, split_chain, CertificateStore, KeyType, OutputLayout, SavedFiles, StorageError};
pub use target::{is_valid_hostname, Target, TargetError, ACME_CHALLENGE_LABEL};
