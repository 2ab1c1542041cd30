// RLM-Agent: Resilient LLM Provider
// Retry with exponential backoff and an ordered fallback chain.
// The agent core never retries; this wrapper is where retry policy lives.

use super::{AsyncCompletion, LlmConfig, LlmProvider, LlmResponse, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per provider
    pub max_retries: u32,
    /// Base delay between retries (will be multiplied exponentially)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) to add randomness to delays
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// No retries at all; first failure moves on to the next provider
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
        let capped_delay = exponential_delay.min(self.max_delay_ms);

        let jitter_range = (capped_delay as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            fastrand::u64(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }
}

/// Error classification for determining retry behavior
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Network issues, rate limits, 5xx
    Transient,
    /// Auth failures, invalid requests, unknown models
    Permanent,
    /// Treated as transient
    Unknown,
}

impl ErrorKind {
    /// Classify an error from its display text
    pub fn classify(error: &anyhow::Error) -> Self {
        let text = error.to_string().to_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if any(&["timeout", "timed out", "connection", "network", "temporarily",
                 "service unavailable", "502", "503", "504"]) {
            return Self::Transient;
        }
        if any(&["rate limit", "too many requests", "429", "quota"]) {
            return Self::Transient;
        }
        if any(&["500", "internal server error"]) {
            return Self::Transient;
        }
        if any(&["unauthorized", "401", "403", "forbidden", "invalid api key",
                 "authentication", "api key not configured"]) {
            return Self::Permanent;
        }
        if any(&["bad request", "400", "invalid", "not found", "404",
                 "unsupported model", "context length", "token limit"]) {
            return Self::Permanent;
        }

        Self::Unknown
    }

    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Transient | Self::Unknown)
    }
}

/// Statistics for resilient provider operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub retry_count: u64,
    pub fallback_count: u64,
    pub permanent_failures: u64,
}

/// A completion service wrapping an ordered list of providers with retry and fallback
pub struct ResilientLlmProvider {
    /// (name, provider), primary first
    providers: Vec<(String, Arc<dyn AsyncCompletion>)>,
    retry_config: RetryConfig,
    stats: Mutex<ResilienceStats>,
}

impl ResilientLlmProvider {
    /// Build from provider configurations; fails if any config lacks an API key
    pub fn from_configs(configs: Vec<LlmConfig>, retry_config: RetryConfig) -> Result<Self, anyhow::Error> {
        if configs.is_empty() {
            anyhow::bail!("At least one provider configuration is required");
        }

        let mut providers: Vec<(String, Arc<dyn AsyncCompletion>)> = Vec::new();
        for config in configs {
            let name = format!("{:?}/{}", config.provider, config.model);
            providers.push((name, Arc::new(LlmProvider::new(config)?)));
        }

        Ok(Self::new(providers, retry_config))
    }

    pub fn new(providers: Vec<(String, Arc<dyn AsyncCompletion>)>, retry_config: RetryConfig) -> Self {
        Self {
            providers,
            retry_config,
            stats: Mutex::new(ResilienceStats::default()),
        }
    }

    pub fn stats(&self) -> ResilienceStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn bump(&self, update: impl FnOnce(&mut ResilienceStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Try a single provider with retry logic
    async fn try_with_retries(
        &self,
        name: &str,
        provider: &dyn AsyncCompletion,
        messages: &[Message],
    ) -> Result<LlmResponse, anyhow::Error> {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.retry_config.calculate_delay(attempt - 1);
                log::debug!(
                    "Retry attempt {}/{} for {} after {:?} delay",
                    attempt,
                    self.retry_config.max_retries,
                    name,
                    delay
                );
                self.bump(|s| s.retry_count += 1);
                tokio::time::sleep(delay).await;
            }

            match provider.complete(messages.to_vec()).await {
                Ok(response) => {
                    if attempt > 0 {
                        log::info!("Provider {} succeeded after {} retries", name, attempt);
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let kind = ErrorKind::classify(&e);
                    log::debug!(
                        "Provider {} attempt {}/{} failed ({:?}): {}",
                        name,
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        kind,
                        e
                    );

                    if !kind.should_retry() {
                        log::warn!("Provider {} hit a permanent error, not retrying: {}", name, e);
                        self.bump(|s| s.permanent_failures += 1);
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Provider {} exhausted all retries", name)))
    }
}

#[async_trait]
impl AsyncCompletion for ResilientLlmProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse, anyhow::Error> {
        self.bump(|s| s.total_requests += 1);
        let mut last_error: Option<anyhow::Error> = None;

        for (idx, (name, provider)) in self.providers.iter().enumerate() {
            if idx > 0 {
                self.bump(|s| s.fallback_count += 1);
                log::warn!("Falling back to provider {} ({}/{})", name, idx + 1, self.providers.len());
            }

            match self.try_with_retries(name, provider.as_ref(), &messages).await {
                Ok(response) => {
                    self.bump(|s| s.successful_requests += 1);
                    return Ok(response);
                }
                Err(e) => {
                    log::warn!("Provider {} failed: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No providers configured")))
    }
}
