//! Propagation checks for challenge records
//!
//! Every authoritative nameserver of the domain is asked directly, without
//! recursion, until it serves the expected TXT value. Nameservers are checked
//! one after another and all of them must agree before the authority is told
//! to validate.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::poll::{poll_until, Attempt, Poll, PollError};
use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Could not resolve nameserver {nameserver}: {message}")]
    NameserverAddress { nameserver: String, message: String },

    #[error("TXT lookup of {fqdn} at {nameserver} failed: {message}")]
    Lookup {
        nameserver: String,
        fqdn: String,
        message: String,
    },
}

/// Asks one nameserver for the TXT record at a name
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// First string of the first TXT answer, if any
    async fn first_txt(&self, nameserver: &str, fqdn: &str) -> Result<Option<String>, QueryError>;
}

/// [`TxtLookup`] that sends non-recursive UDP queries straight to the nameserver
pub struct HickoryLookup {
    timeout: Duration,
    resolvers: Mutex<HashMap<String, TokioResolver>>,
}

impl HickoryLookup {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    async fn resolver_for(&self, nameserver: &str) -> Result<TokioResolver, QueryError> {
        let cached = self.resolvers.lock().get(nameserver).cloned();
        if let Some(resolver) = cached {
            return Ok(resolver);
        }

        let address = tokio::net::lookup_host((nameserver, 53))
            .await
            .map_err(|e| QueryError::NameserverAddress {
                nameserver: nameserver.to_string(),
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| QueryError::NameserverAddress {
                nameserver: nameserver.to_string(),
                message: "no addresses".to_string(),
            })?;
        debug!(nameserver, %address, "Resolved nameserver");

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(address, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.recursion_desired = false;
        opts.cache_size = 0;
        opts.attempts = 1;
        opts.timeout = self.timeout;

        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        self.resolvers
            .lock()
            .insert(nameserver.to_string(), resolver.clone());
        Ok(resolver)
    }
}

impl Default for HickoryLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtLookup for HickoryLookup {
    async fn first_txt(&self, nameserver: &str, fqdn: &str) -> Result<Option<String>, QueryError> {
        let resolver = self.resolver_for(nameserver).await?;

        let lookup = resolver
            .txt_lookup(fqdn)
            .await
            .map_err(|e| QueryError::Lookup {
                nameserver: nameserver.to_string(),
                fqdn: fqdn.to_string(),
                message: e.to_string(),
            })?;

        Ok(lookup.iter().next().and_then(|txt| {
            txt.txt_data()
                .first()
                .map(|data| String::from_utf8_lossy(data).into_owned())
        }))
    }
}

/// Where and how long to wait for a record to propagate
#[derive(Debug, Clone)]
pub struct PropagationSettings {
    /// Nameserver hostnames, checked in order
    pub nameservers: Vec<String>,
    /// Attempts per nameserver
    pub attempts: u32,
    pub interval: Duration,
    /// Extra wait once every nameserver agrees
    pub grace: Duration,
}

impl PropagationSettings {
    /// 60 attempts one second apart per nameserver, then 10 seconds of grace
    pub fn new<I, S>(nameservers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let poll = Poll::default();
        Self {
            nameservers: nameservers.into_iter().map(Into::into).collect(),
            attempts: poll.attempts,
            interval: poll.interval,
            grace: Duration::from_secs(10),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn poll(&self) -> Poll {
        Poll::new(self.attempts, self.interval)
    }
}

/// Waits until every configured nameserver serves the expected TXT value
pub struct PropagationVerifier {
    lookup: Arc<dyn TxtLookup>,
    settings: PropagationSettings,
}

impl PropagationVerifier {
    pub fn new(lookup: Arc<dyn TxtLookup>, settings: PropagationSettings) -> Self {
        Self { lookup, settings }
    }

    pub async fn verify(
        &self,
        query_fqdn: &str,
        expected: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        info!(record = %query_fqdn, "Waiting for DNS to propagate...");

        for nameserver in &self.settings.nameservers {
            let result: Result<(), PollError<Infallible>> =
                poll_until(self.settings.poll(), cancel, |attempt| async move {
                    match self.lookup.first_txt(nameserver, query_fqdn).await {
                        Ok(Some(value)) if value == expected => Attempt::Ready(()),
                        Ok(found) => {
                            trace!(nameserver = %nameserver, attempt, ?found, "Record not there yet");
                            Attempt::Pending
                        }
                        Err(e) => {
                            trace!(nameserver = %nameserver, attempt, error = %e, "Lookup failed");
                            Attempt::Pending
                        }
                    }
                })
                .await;

            match result {
                Ok(()) => debug!(nameserver = %nameserver, "Record propagated"),
                Err(PollError::Exhausted { attempts }) => {
                    return Err(ProviderError::PropagationTimeout {
                        nameserver: nameserver.clone(),
                        attempts,
                    })
                }
                Err(PollError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(PollError::Failed(never)) => match never {},
            }
        }

        if !self.settings.grace.is_zero() {
            info!(
                grace_secs = self.settings.grace.as_secs(),
                "Waiting an extra moment just to be sure..."
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.settings.grace) => {}
            }
        }

        Ok(())
    }
}
