//! Provider chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{BacklogGenerator, BacklogPrompt, GenerationError};
use serde_json::Value;
use tracing::warn;

/// Tries each provider in order and returns the first answer.
///
/// Any failure moves on to the next provider; the last failure is returned
/// when every provider failed. With a provider timeout set, a provider that
/// does not answer in time counts as failed, so a hung endpoint never keeps
/// the later providers from running.
#[derive(Clone, Default)]
pub struct FallbackGenerator {
    providers: Vec<Arc<dyn BacklogGenerator>>,
    provider_timeout: Option<Duration>,
}

impl FallbackGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then(mut self, provider: Arc<dyn BacklogGenerator>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Bounds every single provider call.
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    /// Longest a full pass over the chain can take, when providers are bounded.
    pub fn chain_timeout(&self) -> Option<Duration> {
        let providers = u32::try_from(self.providers.len()).unwrap_or(u32::MAX).max(1);
        self.provider_timeout
            .map(|timeout| timeout.saturating_mul(providers))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl BacklogGenerator for FallbackGenerator {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate(&self, prompt: &BacklogPrompt) -> Result<Value, GenerationError> {
        let mut last_error = None;
        for provider in &self.providers {
            let answer = match self.provider_timeout {
                Some(timeout) => tokio::time::timeout(timeout, provider.generate(prompt))
                    .await
                    .unwrap_or(Err(GenerationError::Timeout(timeout))),
                None => provider.generate(prompt).await,
            };
            match answer {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!(provider = provider.name(), %error, "Generator failed, trying next provider");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GenerationError::NotConfigured(
                "no generative service configured (set a local endpoint or an OpenAI key)".into(),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;

    struct Fixed {
        name: &'static str,
        answer: Result<Value, GenerationError>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(name: &'static str, answer: Result<Value, GenerationError>) -> Arc<Self> {
            Self::slow(name, answer, Duration::ZERO)
        }

        fn slow(
            name: &'static str,
            answer: Result<Value, GenerationError>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                answer,
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl BacklogGenerator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _: &BacklogPrompt) -> Result<Value, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.answer.clone()
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let local = Fixed::new("local", Err(GenerationError::Network("refused".into())));
        let remote = Fixed::new("openai", Ok(json!({ "tasks": [] })));
        let spare = Fixed::new("spare", Ok(json!({ "tasks": [{ "title": "no" }] })));
        let chain = FallbackGenerator::new()
            .then(local.clone())
            .then(remote.clone())
            .then(spare.clone());

        let value = chain.generate(&BacklogPrompt::new("x")).await.unwrap();
        assert_eq!(value, json!({ "tasks": [] }));
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(spare.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.provider_names(), ["local", "openai", "spare"]);
    }

    #[tokio::test]
    async fn last_error_is_returned() {
        let chain = FallbackGenerator::new()
            .then(Fixed::new("local", Err(GenerationError::Network("refused".into()))))
            .then(Fixed::new(
                "openai",
                Err(GenerationError::Http {
                    status: 401,
                    body: "bad key".into(),
                }),
            ));

        let err = chain.generate(&BacklogPrompt::new("x")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn empty_chain_is_not_configured() {
        let err = FallbackGenerator::new()
            .generate(&BacklogPrompt::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn a_hung_provider_falls_through_to_the_next() {
        let local = Fixed::slow("local", Ok(json!({ "tasks": [] })), Duration::from_secs(3600));
        let remote = Fixed::new("openai", Ok(json!({ "tasks": [{ "title": "Fix bug" }] })));
        let chain = FallbackGenerator::new()
            .then(local.clone())
            .then(remote.clone())
            .with_provider_timeout(Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let value = chain.generate(&BacklogPrompt::new("x")).await.unwrap();

        assert_eq!(value["tasks"][0]["title"], "Fix bug");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn every_provider_timing_out_reports_a_timeout() {
        let chain = FallbackGenerator::new()
            .then(Fixed::slow("local", Ok(json!({})), Duration::from_secs(3600)))
            .with_provider_timeout(Duration::from_secs(5));

        let err = chain.generate(&BacklogPrompt::new("x")).await.unwrap_err();
        assert_eq!(err, GenerationError::Timeout(Duration::from_secs(5)));
    }

    #[test]
    fn chain_timeout_covers_every_provider() {
        let fixed = || Fixed::new("p", Ok(json!({})));
        let chain = FallbackGenerator::new().then(fixed()).then(fixed());
        assert_eq!(chain.chain_timeout(), None);

        let chain = chain.with_provider_timeout(Duration::from_secs(20));
        assert_eq!(chain.chain_timeout(), Some(Duration::from_secs(40)));
    }
}
