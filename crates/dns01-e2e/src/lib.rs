//! End-to-end test utilities for the dns01 issuance flow
//!
//! Stand-ins for the ACME server, the DNS control plane, nameservers and the
//! operator, so the whole flow runs without network access.

pub mod certificates;
pub mod harness;
pub mod mock_authority;
pub mod mock_dns;
pub mod prompter;

pub use certificates::TestChain;
pub use harness::{Harness, ProviderChoice};
pub use mock_authority::{MockAuthority, ACCOUNT_URL, DNS_VALUE, ORDER_URL, TERMS_URL, TOKEN};
pub use mock_dns::{MockControlPlane, MockLookup};
pub use prompter::ScriptedPrompter;
