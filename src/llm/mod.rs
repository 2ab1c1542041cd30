// RLM-Agent: LLM layer
// The agent core depends only on `CompletionBackend`; real providers are async
// and reach it through `BlockingBackend`.

pub mod bridge;
pub mod prompts;
pub mod provider;
pub mod resilient;
pub mod scripted;

pub use bridge::BlockingBackend;
pub use prompts::{PromptTemplate, SystemPrompts};
pub use provider::{AsyncCompletion, LlmConfig, LlmProvider, LlmResponse, Message, ProviderType, Role};
pub use resilient::{ResilientLlmProvider, RetryConfig};
pub use scripted::ScriptedBackend;

use std::sync::Arc;

use crate::error::RlmError;

/// Synchronous chat completion: the only thing the agent loop needs from a model.
///
/// A failure is fatal for the run that made the call; retries belong to the
/// implementation.
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, messages: &[Message]) -> Result<String, anyhow::Error>;

    /// Short label used in logs
    fn name(&self) -> &str {
        "backend"
    }
}

/// Build a blocking backend for a provider configuration, with retries.
///
/// A provider that cannot be set up (no API key, bad client settings) is a
/// configuration error; failing to start the bridge runtime is an I/O error.
pub fn connect(config: LlmConfig, retry: RetryConfig) -> Result<Arc<dyn CompletionBackend>, RlmError> {
    let label = format!("{:?}/{}", config.provider, config.model);
    let provider = ResilientLlmProvider::from_configs(vec![config], retry)
        .map_err(|e| RlmError::Config(format!("{:#}", e)))?;
    let backend =
        BlockingBackend::new(Arc::new(provider), &label).map_err(|e| RlmError::Io(format!("{:#}", e)))?;
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_api_key_is_a_config_error() {
        let config = LlmConfig { api_key: None, ..LlmConfig::default() };
        match connect(config, RetryConfig::default()) {
            Err(RlmError::Config(message)) => assert!(message.contains("API key not configured")),
            Err(other) => panic!("expected a configuration error, got {:?}", other),
            Ok(_) => panic!("expected a configuration error"),
        }
    }
}
