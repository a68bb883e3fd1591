//! Mock DNS control plane and nameservers for E2E tests
//!
//! [`MockControlPlane`] keeps TXT records in memory; [`MockLookup`] answers
//! nameserver queries from the same records, optionally lagging behind for a
//! number of queries per nameserver to simulate propagation delay.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dns01_core::{
    ControlPlaneError, ControlPlaneFactory, DnsControlPlane, DnsRecord, QueryError,
    ReplaceOutcome, TxtLookup,
};

/// Records kept per `(domain, name)`
type Zone = BTreeMap<(String, String), Vec<DnsRecord>>;

/// Tracks record operations without making real API calls
pub struct MockControlPlane {
    records: Mutex<Zone>,
    replace_calls: AtomicU32,
    remove_calls: AtomicU32,
    /// Simulate a transport failure on every call
    fail_transport: AtomicBool,
    /// Reject replaces with this message
    reject_replace: Mutex<Option<Option<String>>>,
    /// Make removals fail at the transport level
    fail_remove: AtomicBool,
}

impl MockControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory handing out views of this plane scoped to a domain
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ControlPlaneFactory> {
        let plane = Arc::clone(self);
        Arc::new(move |domain: &str| -> Arc<dyn DnsControlPlane> {
            Arc::new(DomainView {
                plane: Arc::clone(&plane),
                domain: domain.to_string(),
            })
        })
    }

    /// Pre-existing TXT value at `name` in `domain`
    pub fn insert_txt(&self, domain: &str, name: &str, value: &str) {
        self.records
            .lock()
            .entry((domain.to_string(), name.to_string()))
            .or_default()
            .push(DnsRecord {
                name: name.to_string(),
                record_type: "TXT".to_string(),
                data: value.to_string(),
            });
    }

    /// TXT values currently at `name` in `domain`
    pub fn txt_values(&self, domain: &str, name: &str) -> Vec<String> {
        self.records
            .lock()
            .get(&(domain.to_string(), name.to_string()))
            .map(|records| records.iter().map(|r| r.data.clone()).collect())
            .unwrap_or_default()
    }

    /// First TXT value at a fully qualified name, as a nameserver would serve it
    pub fn lookup(&self, fqdn: &str) -> Option<String> {
        let records = self.records.lock();
        records.iter().find_map(|((domain, name), records)| {
            let full = if name.is_empty() {
                domain.clone()
            } else {
                format!("{}.{}", name, domain)
            };
            if full.eq_ignore_ascii_case(fqdn) {
                records.first().map(|r| r.data.clone())
            } else {
                None
            }
        })
    }

    pub fn replace_calls(&self) -> u32 {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> u32 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Reject replaces; `None` means the API gave no explanation
    pub fn set_reject_replace(&self, message: Option<&str>) {
        *self.reject_replace.lock() = Some(message.map(String::from));
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    fn check_transport(&self) -> Result<(), ControlPlaneError> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::Request("Simulated connection failure".into()));
        }
        Ok(())
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            replace_calls: AtomicU32::new(0),
            remove_calls: AtomicU32::new(0),
            fail_transport: AtomicBool::new(false),
            reject_replace: Mutex::new(None),
            fail_remove: AtomicBool::new(false),
        }
    }
}

struct DomainView {
    plane: Arc<MockControlPlane>,
    domain: String,
}

impl DomainView {
    fn key(&self, name: &str) -> (String, String) {
        (self.domain.clone(), name.to_string())
    }
}

#[async_trait]
impl DnsControlPlane for DomainView {
    async fn list_records(
        &self,
        name: &str,
        record_type: &str,
    ) -> Result<Option<Vec<DnsRecord>>, ControlPlaneError> {
        self.plane.check_transport()?;
        let records = self.plane.records.lock();
        Ok(records.get(&self.key(name)).map(|records| {
            records
                .iter()
                .filter(|r| r.record_type == record_type)
                .cloned()
                .collect()
        }))
    }

    async fn replace_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
        _ttl: u32,
    ) -> Result<ReplaceOutcome, ControlPlaneError> {
        self.plane.check_transport()?;
        self.plane.replace_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.plane.reject_replace.lock().clone() {
            return Ok(ReplaceOutcome::rejected(message));
        }

        self.plane.records.lock().insert(
            self.key(name),
            vec![DnsRecord {
                name: name.to_string(),
                record_type: record_type.to_string(),
                data: value.to_string(),
            }],
        );
        tracing::debug!("MockControlPlane: {} {} = {}", self.domain, name, value);
        Ok(ReplaceOutcome::Replaced)
    }

    async fn remove_record(
        &self,
        name: &str,
        _record_type: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError> {
        self.plane.check_transport()?;
        if self.plane.fail_remove.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::Request("Simulated remove failure".into()));
        }
        self.plane.remove_calls.fetch_add(1, Ordering::SeqCst);

        let mut records = self.plane.records.lock();
        let key = self.key(name);
        let Some(existing) = records.get_mut(&key) else {
            return Ok(false);
        };
        let before = existing.len();
        existing.retain(|r| r.data != value);
        let removed = existing.len() != before;
        if existing.is_empty() {
            records.remove(&key);
        }
        Ok(removed)
    }
}

/// Nameservers backed by a [`MockControlPlane`]
pub struct MockLookup {
    plane: Arc<MockControlPlane>,
    /// Queries each nameserver answers empty before serving the record
    lag: u32,
    /// Nameservers that never serve the record
    stale: Vec<String>,
    queries: Mutex<HashMap<String, u32>>,
}

impl MockLookup {
    pub fn new(plane: Arc<MockControlPlane>) -> Arc<Self> {
        Self::lagging(plane, 0)
    }

    pub fn lagging(plane: Arc<MockControlPlane>, lag: u32) -> Arc<Self> {
        Arc::new(Self {
            plane,
            lag,
            stale: Vec::new(),
            queries: Mutex::new(HashMap::new()),
        })
    }

    /// Lookup on which `nameserver` never catches up
    pub fn with_stale(plane: Arc<MockControlPlane>, nameserver: &str) -> Arc<Self> {
        Arc::new(Self {
            plane,
            lag: 0,
            stale: vec![nameserver.to_string()],
            queries: Mutex::new(HashMap::new()),
        })
    }

    /// Queries sent to `nameserver` so far
    pub fn queries(&self, nameserver: &str) -> u32 {
        self.queries.lock().get(nameserver).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TxtLookup for MockLookup {
    async fn first_txt(&self, nameserver: &str, fqdn: &str) -> Result<Option<String>, QueryError> {
        let seen = {
            let mut queries = self.queries.lock();
            let count = queries.entry(nameserver.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.stale.iter().any(|ns| ns == nameserver) || seen <= self.lag {
            return Ok(None);
        }
        Ok(self.plane.lookup(fqdn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_and_remove() {
        let plane = MockControlPlane::new();
        let view = plane.factory().for_domain("example.com");

        view.replace_record("_acme-challenge.www", "TXT", "one", 180)
            .await
            .unwrap();
        view.replace_record("_acme-challenge.www", "TXT", "two", 180)
            .await
            .unwrap();
        assert_eq!(
            plane.txt_values("example.com", "_acme-challenge.www"),
            vec!["two".to_string()]
        );
        assert_eq!(
            plane.lookup("_acme-challenge.www.example.com").as_deref(),
            Some("two")
        );

        assert!(view
            .remove_record("_acme-challenge.www", "TXT", "two")
            .await
            .unwrap());
        assert!(view
            .list_records("_acme-challenge.www", "TXT")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_lag() {
        let plane = MockControlPlane::new();
        plane.insert_txt("example.com", "_acme-challenge", "value");
        let lookup = MockLookup::lagging(plane, 2);

        let fqdn = "_acme-challenge.example.com";
        assert_eq!(lookup.first_txt("ns1", fqdn).await.unwrap(), None);
        assert_eq!(lookup.first_txt("ns1", fqdn).await.unwrap(), None);
        assert_eq!(
            lookup.first_txt("ns1", fqdn).await.unwrap().as_deref(),
            Some("value")
        );
        assert_eq!(lookup.queries("ns1"), 3);
        assert_eq!(lookup.queries("ns2"), 0);
    }
}
