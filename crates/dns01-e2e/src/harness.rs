//! Issuance harness for E2E tests
//!
//! Wires an [`Issuer`] to the mocks in this crate with its state file and
//! output directory inside a temporary directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use dns01_core::{
    ApiProvider, CertificateStore, DnsProvider, Issuer, KeyType, ManualProvider, OutputLayout,
    PropagationSettings, PropagationVerifier, Provider, StateFile, StaticSuffixResolver, Target,
};

use crate::mock_authority::MockAuthority;
use crate::mock_dns::{MockControlPlane, MockLookup};
use crate::prompter::ScriptedPrompter;

/// Nameservers the propagation check walks through
pub const NAMESERVERS: [&str; 3] = ["ns1.test", "ns2.test", "ns3.test"];

/// Answers for a first run: agree to the terms, give a contact address
pub const FIRST_RUN_ANSWERS: [&str; 2] = ["y", "admin@example.com"];

/// Which DNS provider the issuer gets
#[derive(Clone)]
pub enum ProviderChoice {
    /// API-backed provider with the given nameserver lookup
    Api(Arc<MockLookup>),
    Manual,
}

pub struct Harness {
    pub dir: TempDir,
    pub target: Target,
    pub authority: Arc<MockAuthority>,
    pub plane: Arc<MockControlPlane>,
    pub prompter: Arc<ScriptedPrompter>,
    pub provider: ProviderChoice,
    pub layout: OutputLayout,
    pub key_type: KeyType,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Harness for `fqdn` with an API provider whose nameservers answer at once
    pub fn new(fqdn: &str) -> Self {
        let suffixes = StaticSuffixResolver::new(["com", "co.uk", "test"]);
        let target = Target::new(fqdn, None, &suffixes).expect("Invalid test target");
        let plane = MockControlPlane::new();
        let lookup = MockLookup::new(plane.clone());

        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            authority: MockAuthority::new(target.fqdn()),
            target,
            plane,
            prompter: ScriptedPrompter::new(FIRST_RUN_ANSWERS),
            provider: ProviderChoice::Api(lookup),
            layout: OutputLayout::Combined,
            key_type: KeyType::Ec,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_authority(mut self, authority: Arc<MockAuthority>) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_answers<I, S>(mut self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prompter = ScriptedPrompter::new(answers);
        self
    }

    pub fn with_provider(mut self, provider: ProviderChoice) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Reload the state file as a later run would see it
    pub fn state(&self) -> StateFile {
        StateFile::open(self.state_path()).expect("Failed to open state")
    }

    pub fn store(&self) -> CertificateStore {
        CertificateStore::new(self.output_dir(), self.layout, self.key_type)
    }

    fn dns_provider(&self) -> Provider {
        match &self.provider {
            ProviderChoice::Api(lookup) => {
                let settings = PropagationSettings::new(NAMESERVERS).with_grace(Duration::ZERO);
                let verifier = PropagationVerifier::new(lookup.clone(), settings);
                ApiProvider::new(self.plane.factory(), verifier).into()
            }
            ProviderChoice::Manual => ManualProvider::new(self.prompter.clone()).into(),
        }
    }

    /// A fresh issuer over the current state file
    pub fn issuer(&self) -> Issuer {
        let provider: Arc<dyn DnsProvider> = Arc::new(self.dns_provider());
        std::fs::create_dir_all(self.output_dir()).expect("Failed to create output dir");

        Issuer::new(
            self.target.clone(),
            self.authority.clone(),
            provider,
            self.prompter.clone(),
            self.state(),
            self.store(),
        )
        .with_cancellation(self.cancel.clone())
    }
}
