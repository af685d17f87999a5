//! Vision provider fallback chain
//!
//! Orchestrates an ordered list of external text-extraction providers with a
//! per-attempt timeout and per-provider retry budget. The first attempt that
//! succeeds wins; no further providers are consulted. A timed-out attempt is
//! cancelled outright (its future is dropped), so a late result can never be
//! observed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;
use crate::error::{EditError, ProviderError};
use crate::types::TextExtraction;

/// An external text-extraction capability.
///
/// Implementations wrap hosted vision/language services; they receive encoded
/// image bytes and return (original, translated) pairs with approximate
/// locations where the service supplies them.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Stable provider name, used in diagnostics.
    fn name(&self) -> &str;

    /// Whether the provider is configured and usable.
    fn is_available(&self) -> bool {
        true
    }

    /// Extract text pairs from an encoded image.
    async fn extract_text(&self, image_bytes: &[u8]) -> Result<Vec<TextExtraction>, ProviderError>;
}

/// Successful extraction plus the provider that produced it.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub extractions: Vec<TextExtraction>,
    pub provider: String,
}

/// Ordered fallback chain over text-extraction providers.
pub struct FallbackChain {
    providers: Vec<Arc<dyn TextProvider>>,
    attempt_timeout: Duration,
    max_retries: u32,
}

impl FallbackChain {
    /// Build a chain from an ordered provider list. Unavailable providers are
    /// filtered out up front.
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, config: &ProviderConfig) -> Self {
        let providers: Vec<_> = providers.into_iter().filter(|p| p.is_available()).collect();
        info!(
            providers = providers.len(),
            timeout_ms = config.attempt_timeout_ms,
            max_retries = config.max_retries,
            "fallback chain initialized"
        );
        Self {
            providers,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            max_retries: config.max_retries,
        }
    }

    /// Names of the providers in the chain, in order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try providers in order until one succeeds.
    ///
    /// Each provider gets `max_retries + 1` attempts; a timeout or error
    /// counts as a failed attempt and advances. Exhausting every provider
    /// fails with `ProviderExhausted` carrying the last error seen.
    pub async fn extract(&self, image_bytes: &[u8]) -> Result<ChainResult, EditError> {
        let mut last_error = String::from("no providers configured");

        for provider in &self.providers {
            for attempt in 0..=self.max_retries {
                debug!(
                    provider = provider.name(),
                    attempt = attempt + 1,
                    "trying extraction provider"
                );

                let outcome =
                    tokio::time::timeout(self.attempt_timeout, provider.extract_text(image_bytes))
                        .await;

                match outcome {
                    Ok(Ok(extractions)) => {
                        info!(
                            provider = provider.name(),
                            extractions = extractions.len(),
                            "extraction successful"
                        );
                        return Ok(ChainResult {
                            extractions,
                            provider: provider.name().to_string(),
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(
                            provider = provider.name(),
                            attempt = attempt + 1,
                            error = %e,
                            "extraction attempt failed"
                        );
                        last_error = format!("{}: {e}", provider.name());
                    }
                    Err(_) => {
                        // The in-flight call was dropped with the future.
                        let e = ProviderError::Timeout(self.attempt_timeout);
                        warn!(
                            provider = provider.name(),
                            attempt = attempt + 1,
                            error = %e,
                            "extraction attempt timed out"
                        );
                        last_error = format!("{}: {e}", provider.name());
                    }
                }
            }
        }

        error!(last_error = %last_error, "all extraction providers failed");
        Err(EditError::ProviderExhausted { last_error })
    }
}

/// Provider serving a fixed extraction list.
///
/// Used by the CLI, which receives translation pairs out of band, and by
/// tests.
pub struct StaticProvider {
    name: String,
    extractions: Vec<TextExtraction>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, extractions: Vec<TextExtraction>) -> Self {
        Self {
            name: name.into(),
            extractions,
        }
    }
}

#[async_trait]
impl TextProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract_text(&self, _image_bytes: &[u8]) -> Result<Vec<TextExtraction>, ProviderError> {
        Ok(self.extractions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingProvider {
        name: &'static str,
        calls: AtomicU32,
    }

    impl FailingProvider {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextProvider for FailingProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn extract_text(
            &self,
            _image_bytes: &[u8],
        ) -> Result<Vec<TextExtraction>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Failed("simulated outage".into()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl TextProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract_text(
            &self,
            _image_bytes: &[u8],
        ) -> Result<Vec<TextExtraction>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    fn sample_extraction() -> TextExtraction {
        TextExtraction {
            original: "ЛОНГ".into(),
            translated: "LONG".into(),
            confidence: 0.9,
            bbox: None,
        }
    }

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            attempt_timeout_ms: 100,
            max_retries: 1,
        }
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = Arc::new(StaticProvider::new("first", vec![sample_extraction()]));
        let second = FailingProvider::new("second");
        let chain = FallbackChain::new(vec![first, second.clone()], &test_config());

        let result = chain.extract(b"png").await.unwrap();
        assert_eq!(result.provider, "first");
        assert_eq!(result.extractions.len(), 1);
        // The second provider must never be consulted.
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_advances_to_next_provider() {
        let broken = FailingProvider::new("broken");
        let backup = Arc::new(StaticProvider::new("backup", vec![sample_extraction()]));
        let chain = FallbackChain::new(vec![broken.clone(), backup], &test_config());

        let result = chain.extract(b"png").await.unwrap();
        assert_eq!(result.provider, "backup");
        // max_retries = 1 means two attempts on the broken provider.
        assert_eq!(broken.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let a = FailingProvider::new("a");
        let b = FailingProvider::new("b");
        let chain = FallbackChain::new(vec![a, b], &test_config());

        let err = chain.extract(b"png").await.unwrap_err();
        match err {
            EditError::ProviderExhausted { last_error } => {
                assert!(last_error.contains("b"), "last error from provider b: {last_error}");
            }
            other => panic!("expected ProviderExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_advances() {
        let backup = Arc::new(StaticProvider::new("backup", vec![sample_extraction()]));
        let chain = FallbackChain::new(vec![Arc::new(SlowProvider), backup], &test_config());

        // Paused time auto-advances past the sleeps; the slow provider's two
        // attempts time out and the backup answers.
        let result = chain.extract(b"png").await.unwrap();
        assert_eq!(result.provider, "backup");
    }

    #[tokio::test]
    async fn test_unavailable_providers_filtered() {
        struct Unavailable;

        #[async_trait]
        impl TextProvider for Unavailable {
            fn name(&self) -> &str {
                "unavailable"
            }
            fn is_available(&self) -> bool {
                false
            }
            async fn extract_text(
                &self,
                _image_bytes: &[u8],
            ) -> Result<Vec<TextExtraction>, ProviderError> {
                panic!("must not be called");
            }
        }

        let chain = FallbackChain::new(vec![Arc::new(Unavailable)], &test_config());
        assert!(chain.provider_names().is_empty());
        assert!(chain.extract(b"png").await.is_err());
    }
}
