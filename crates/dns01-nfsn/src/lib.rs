//! NearlyFreeSpeech.NET DNS API
//!
//! Signed form-encoded requests against `https://api.nearlyfreespeech.net`,
//! exposed to the issuance flow as a [`dns01_core::DnsControlPlane`].

mod auth;
mod client;

use std::sync::Arc;

use dns01_core::{ApiProvider, HickoryLookup, PropagationSettings, PropagationVerifier};

pub use auth::{sign, AUTH_HEADER};
pub use client::{Credentials, NfsnClient, NfsnDns, API_BASE};

/// Authoritative nameservers every NFSN-hosted domain is served from
pub const DEFAULT_NAMESERVERS: [&str; 8] = [
    "ns.phx1.nearlyfreespeech.net",
    "ns.phx2.nearlyfreespeech.net",
    "ns.phx3.nearlyfreespeech.net",
    "ns.phx4.nearlyfreespeech.net",
    "ns.phx5.nearlyfreespeech.net",
    "ns.phx6.nearlyfreespeech.net",
    "ns.phx7.nearlyfreespeech.net",
    "ns.phx8.nearlyfreespeech.net",
];

/// Propagation settings covering [`DEFAULT_NAMESERVERS`]
pub fn default_settings() -> PropagationSettings {
    PropagationSettings::new(DEFAULT_NAMESERVERS)
}

/// API-backed provider that publishes through `client` and checks the
/// NFSN nameservers with live DNS queries
pub fn provider(client: NfsnClient, settings: PropagationSettings) -> ApiProvider {
    let verifier = PropagationVerifier::new(Arc::new(HickoryLookup::new()), settings);
    ApiProvider::new(Arc::new(client), verifier)
}
