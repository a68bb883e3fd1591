use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DnsProvider, ProviderError, CHALLENGE_TTL};
use crate::control_plane::{
    ControlPlaneError, ControlPlaneFactory, DnsControlPlane, ReplaceOutcome, TXT,
};
use crate::propagation::PropagationVerifier;
use crate::target::Target;

/// Provider that publishes records through a hosting control-plane API
///
/// The challenge name holds nothing but challenge records, so setting a value
/// replaces every TXT record there in one call.
pub struct ApiProvider {
    planes: Arc<dyn ControlPlaneFactory>,
    verifier: PropagationVerifier,
}

impl ApiProvider {
    pub fn new(planes: Arc<dyn ControlPlaneFactory>, verifier: PropagationVerifier) -> Self {
        Self { planes, verifier }
    }

    async fn publish(
        &self,
        plane: &dyn DnsControlPlane,
        name: &str,
        value: &str,
    ) -> Result<Option<ReplaceOutcome>, ControlPlaneError> {
        let existing = plane.list_records(name, TXT).await?.unwrap_or_default();
        if existing.iter().any(|record| record.data == value) {
            debug!(name, "Challenge record already present");
            return Ok(None);
        }

        info!(name, ttl = CHALLENGE_TTL, "Replacing challenge TXT record");
        plane
            .replace_record(name, TXT, value, CHALLENGE_TTL)
            .await
            .map(Some)
    }
}

#[async_trait]
impl DnsProvider for ApiProvider {
    async fn setup(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn fulfill_challenge(
        &self,
        target: &Target,
        auth_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let name = target.acme_name();
        let plane = self.planes.for_domain(target.domain());

        let outcome = self
            .publish(plane.as_ref(), &name, auth_key)
            .await
            .map_err(|source| ProviderError::DnsProvider {
                action: "set",
                name: name.clone(),
                domain: target.domain().to_string(),
                source,
            })?;

        if let Some(ReplaceOutcome::Rejected(message)) = outcome {
            return Err(ProviderError::DnsWrite(message));
        }

        self.verifier
            .verify(&target.acme_fqdn(), auth_key, cancel)
            .await
    }

    async fn revoke_challenge(&self, target: &Target) -> Result<(), ProviderError> {
        let name = target.acme_name();
        let plane = self.planes.for_domain(target.domain());
        let transport = |source: ControlPlaneError| ProviderError::DnsProvider {
            action: "remove",
            name: name.clone(),
            domain: target.domain().to_string(),
            source,
        };

        let records = plane
            .list_records(&name, TXT)
            .await
            .map_err(transport)?
            .ok_or_else(|| {
                ProviderError::NotFound("Could not find TXT record to remove.".to_string())
            })?;

        for record in &records {
            let removed = plane
                .remove_record(&name, TXT, &record.data)
                .await
                .map_err(transport)?;
            debug!(name = %name, removed, "Removed challenge TXT record");
        }

        info!(name = %name, count = records.len(), "Challenge records removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::DnsRecord;
    use crate::propagation::{PropagationSettings, QueryError, TxtLookup};
    use crate::psl::StaticSuffixResolver;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakePlane {
        records: Mutex<Option<Vec<DnsRecord>>>,
        replace_calls: Mutex<Vec<(String, String, u32)>>,
        removed: Mutex<Vec<String>>,
        reject_with: Option<Option<String>>,
        fail_transport: bool,
    }

    #[async_trait]
    impl DnsControlPlane for FakePlane {
        async fn list_records(
            &self,
            _name: &str,
            _record_type: &str,
        ) -> Result<Option<Vec<DnsRecord>>, ControlPlaneError> {
            if self.fail_transport {
                return Err(ControlPlaneError::Request("connection refused".to_string()));
            }
            Ok(self.records.lock().clone())
        }

        async fn replace_record(
            &self,
            name: &str,
            record_type: &str,
            value: &str,
            ttl: u32,
        ) -> Result<ReplaceOutcome, ControlPlaneError> {
            self.replace_calls
                .lock()
                .push((name.to_string(), value.to_string(), ttl));
            if let Some(message) = &self.reject_with {
                return Ok(ReplaceOutcome::rejected(message.clone()));
            }
            *self.records.lock() = Some(vec![DnsRecord {
                name: name.to_string(),
                record_type: record_type.to_string(),
                data: value.to_string(),
            }]);
            Ok(ReplaceOutcome::Replaced)
        }

        async fn remove_record(
            &self,
            _name: &str,
            _record_type: &str,
            value: &str,
        ) -> Result<bool, ControlPlaneError> {
            self.removed.lock().push(value.to_string());
            Ok(true)
        }
    }

    /// Answers with whatever the plane currently holds
    struct PlaneLookup(Arc<FakePlane>);

    #[async_trait]
    impl TxtLookup for PlaneLookup {
        async fn first_txt(
            &self,
            _nameserver: &str,
            _fqdn: &str,
        ) -> Result<Option<String>, QueryError> {
            Ok(self
                .0
                .records
                .lock()
                .as_ref()
                .and_then(|records| records.first().map(|r| r.data.clone())))
        }
    }

    fn provider(plane: Arc<FakePlane>) -> ApiProvider {
        let verifier = PropagationVerifier::new(
            Arc::new(PlaneLookup(plane.clone())),
            PropagationSettings::new(["ns1.example.net", "ns2.example.net"])
                .with_grace(Duration::ZERO),
        );
        let factory = move |_domain: &str| plane.clone() as Arc<dyn DnsControlPlane>;
        ApiProvider::new(Arc::new(factory), verifier)
    }

    fn txt(data: &str) -> DnsRecord {
        DnsRecord {
            name: "_acme-challenge".to_string(),
            record_type: TXT.to_string(),
            data: data.to_string(),
        }
    }

    fn target() -> Target {
        Target::new("example.com", None, &StaticSuffixResolver::new(["com"])).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_record_skips_replace() {
        let plane = Arc::new(FakePlane::default());
        *plane.records.lock() = Some(vec![txt("abc123")]);

        provider(plane.clone())
            .fulfill_challenge(&target(), "abc123", &CancellationToken::new())
            .await
            .unwrap();

        assert!(plane.replace_calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaces_with_challenge_ttl() {
        let plane = Arc::new(FakePlane::default());

        provider(plane.clone())
            .fulfill_challenge(&target(), "abc123", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            plane.replace_calls.lock().as_slice(),
            [("_acme-challenge".to_string(), "abc123".to_string(), 180)]
        );
    }

    #[tokio::test]
    async fn test_rejection_message_is_reported() {
        let plane = Arc::new(FakePlane {
            reject_with: Some(Some("API error message".to_string())),
            ..Default::default()
        });

        let err = provider(plane)
            .fulfill_challenge(&target(), "abc123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::DnsWrite(_)));
        assert!(err.to_string().contains("API error message"));
        assert!(err.to_string().starts_with("Failed to replace record: "));
    }

    #[tokio::test]
    async fn test_rejection_without_message() {
        let plane = Arc::new(FakePlane {
            reject_with: Some(None),
            ..Default::default()
        });

        let err = provider(plane)
            .fulfill_challenge(&target(), "abc123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to replace record: Unknown error");
    }

    #[tokio::test]
    async fn test_transport_error_names_record() {
        let plane = Arc::new(FakePlane {
            fail_transport: true,
            ..Default::default()
        });

        let err = provider(plane)
            .fulfill_challenge(&target(), "abc123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("Failed to set DNS TXT record for _acme-challenge on example.com"));
    }

    #[tokio::test]
    async fn test_revoke_removes_every_record() {
        let plane = Arc::new(FakePlane::default());
        *plane.records.lock() = Some(vec![txt("one"), txt("two")]);

        provider(plane.clone()).revoke_challenge(&target()).await.unwrap();

        assert_eq!(plane.removed.lock().as_slice(), ["one", "two"]);
    }

    #[tokio::test]
    async fn test_revoke_without_listing() {
        let plane = Arc::new(FakePlane::default());

        let err = provider(plane).revoke_challenge(&target()).await.unwrap_err();

        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(err.to_string(), "Could not find TXT record to remove.");
    }
}
