use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DnsProvider, ProviderError};
use crate::prompt::{blocking, Prompter};
use crate::target::Target;

/// Provider that has the operator create the record by hand
pub struct ManualProvider {
    prompter: Arc<dyn Prompter>,
}

impl ManualProvider {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl DnsProvider for ManualProvider {
    async fn setup(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn fulfill_challenge(
        &self,
        target: &Target,
        auth_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        self.prompter.say("Please create the following DNS TXT record:\n");
        self.prompter.say(&format!("$ORIGIN {}.", target.domain()));
        self.prompter.say(&format!("{} IN TXT \"{}\"\n", target.acme_name(), auth_key));

        let proceed = blocking(|| self.prompter.confirm("Do you want to continue? "))?;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if !proceed {
            return Err(ProviderError::ManualAbort);
        }

        tracing::debug!(record = %target.acme_fqdn(), "Operator confirmed manual record");
        Ok(())
    }

    async fn revoke_challenge(&self, _target: &Target) -> Result<(), ProviderError> {
        self.prompter.say("It is now safe to remove the DNS TXT record.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptError;
    use crate::psl::StaticSuffixResolver;
    use parking_lot::Mutex;

    struct FixedPrompter {
        answer: Result<bool, ()>,
        output: Mutex<Vec<String>>,
    }

    impl FixedPrompter {
        fn new(answer: Result<bool, ()>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                output: Mutex::new(Vec::new()),
            })
        }
    }

    impl Prompter for FixedPrompter {
        fn say(&self, message: &str) {
            self.output.lock().push(message.to_string());
        }

        fn confirm(&self, question: &str) -> Result<bool, PromptError> {
            self.output.lock().push(question.to_string());
            self.answer.map_err(|_| PromptError::Closed)
        }

        fn read_line(&self, _question: &str) -> Result<Option<String>, PromptError> {
            Ok(None)
        }
    }

    fn target(fqdn: &str) -> Target {
        Target::new(fqdn, None, &StaticSuffixResolver::new(["com"])).unwrap()
    }

    #[tokio::test]
    async fn test_prints_zone_snippet() {
        let prompter = FixedPrompter::new(Ok(true));
        let provider = ManualProvider::new(prompter.clone());

        provider
            .fulfill_challenge(&target("www.example.com"), "abc123", &CancellationToken::new())
            .await
            .unwrap();

        let output = prompter.output.lock().join("\n");
        assert!(output.contains("$ORIGIN example.com."));
        assert!(output.contains("_acme-challenge.www IN TXT \"abc123\""));
        assert!(output.contains("Do you want to continue?"));
    }

    #[tokio::test]
    async fn test_declining_aborts() {
        let provider = ManualProvider::new(FixedPrompter::new(Ok(false)));
        let err = provider
            .fulfill_challenge(&target("example.com"), "abc123", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ManualAbort));
    }

    #[tokio::test]
    async fn test_closed_input_is_prompt_error() {
        let provider = ManualProvider::new(FixedPrompter::new(Err(())));
        let err = provider
            .fulfill_challenge(&target("example.com"), "abc123", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Prompt(PromptError::Closed)));
    }

    #[tokio::test]
    async fn test_revoke_only_informs() {
        let prompter = FixedPrompter::new(Ok(true));
        let provider = ManualProvider::new(prompter.clone());
        provider.revoke_challenge(&target("example.com")).await.unwrap();
        assert_eq!(
            prompter.output.lock().as_slice(),
            ["It is now safe to remove the DNS TXT record."]
        );
    }
}
