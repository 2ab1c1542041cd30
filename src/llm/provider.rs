// RLM-Agent: LLM Provider Abstraction
// Real completion backends behind one async interface:
// - OpenAI / OpenAI-compatible (including Cerebras' OpenAI endpoint): via rig-core
// - Anthropic: via rig-core
// - OpenRouter: via rig-core's native provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Base URL of Cerebras' OpenAI-compatible inference API
const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";

/// Supported LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub enum ProviderType {
    #[default]
    OpenAI,
    Anthropic,
    /// Cerebras, reached through its OpenAI-compatible endpoint
    Cerebras,
    /// OpenRouter.ai - unified API for multiple models
    OpenRouter,
    /// Any OpenAI-compatible API (requires base_url)
    OpenAICompatible,
}

impl ProviderType {
    /// Parse a provider name as given on the command line
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAI),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "cerebras" => Some(Self::Cerebras),
            "openrouter" => Some(Self::OpenRouter),
            "compatible" | "openai-compatible" => Some(Self::OpenAICompatible),
            _ => None,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: ProviderType,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAI,
            model: "gpt-4o".to_string(),
            api_key: env::var("OPENAI_API_KEY").ok(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

impl LlmConfig {
    /// Preset for the given provider, with the API key taken from the environment
    pub fn for_provider(provider: ProviderType) -> Self {
        match provider {
            ProviderType::OpenAI => Self::default(),
            ProviderType::Anthropic => Self::anthropic(),
            ProviderType::Cerebras => Self::cerebras(),
            ProviderType::OpenRouter => Self::openrouter(),
            ProviderType::OpenAICompatible => Self {
                provider: ProviderType::OpenAICompatible,
                base_url: env::var("OPENAI_BASE_URL").ok(),
                ..Self::default()
            },
        }
    }

    /// Cerebras configuration (OpenAI-compatible endpoint)
    pub fn cerebras() -> Self {
        Self {
            provider: ProviderType::Cerebras,
            model: "llama-3.3-70b".to_string(),
            api_key: env::var("CEREBRAS_API_KEY").ok(),
            base_url: Some(CEREBRAS_BASE_URL.to_string()),
            temperature: 0.0,
            max_tokens: 8192,
        }
    }

    /// Anthropic Claude configuration
    pub fn anthropic() -> Self {
        Self {
            provider: ProviderType::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: env::var("ANTHROPIC_API_KEY").ok(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    /// OpenRouter configuration (access multiple models via one API)
    pub fn openrouter() -> Self {
        Self {
            provider: ProviderType::OpenRouter,
            model: "anthropic/claude-sonnet-4".to_string(),
            api_key: env::var("OPENROUTER_API_KEY").ok(),
            base_url: Some("https://openrouter.ai/api/v1".to_string()),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    /// Custom OpenAI-compatible API (e.g., local LLM servers)
    pub fn openai_compatible(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            provider: ProviderType::OpenAICompatible,
            model: model.to_string(),
            api_key,
            base_url: Some(base_url.to_string()),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self { role: Role::System, content: content.to_string() }
    }

    pub fn user(content: &str) -> Self {
        Self { role: Role::User, content: content.to_string() }
    }

    pub fn assistant(content: &str) -> Self {
        Self { role: Role::Assistant, content: content.to_string() }
    }
}

/// LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub finish_reason: Option<String>,
}

/// An asynchronous chat-completion service.
///
/// Implemented by [`LlmProvider`] and the retrying wrapper; the agent loop only
/// sees these through [`super::BlockingBackend`].
#[async_trait]
pub trait AsyncCompletion: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse, anyhow::Error>;
}

/// Unified LLM provider
#[derive(Debug, Clone)]
pub struct LlmProvider {
    config: LlmConfig,
}

impl LlmProvider {
    pub fn new(config: LlmConfig) -> Result<Self, anyhow::Error> {
        if config.api_key.is_none() {
            anyhow::bail!("API key not configured for {:?}", config.provider);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Split a conversation into the system preamble and a role-labelled transcript.
    ///
    /// The rig agents used here take a single prompt, so every non-system turn
    /// is rendered in order; the model answers as the next assistant turn.
    pub fn render_transcript(messages: &[Message]) -> (String, String) {
        let system = messages.iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<&Message> = messages.iter()
            .filter(|m| m.role != Role::System)
            .collect();

        // A lone user turn is sent verbatim
        if let [only] = turns.as_slice() {
            if only.role == Role::User {
                return (system, only.content.clone());
            }
        }

        let mut transcript = String::new();
        for message in turns {
            transcript.push_str(&format!("[{}]\n{}\n\n", message.role, message.content));
        }
        transcript.push_str("[assistant]\n");

        (system, transcript)
    }

    async fn call_llm(&self, system: &str, user: &str) -> Result<String, anyhow::Error> {
        match self.config.provider {
            ProviderType::Anthropic => self.call_anthropic(system, user).await,
            ProviderType::OpenAI => self.call_openai(system, user, None).await,
            ProviderType::OpenRouter => self.call_openrouter(system, user).await,
            ProviderType::Cerebras | ProviderType::OpenAICompatible => {
                let base_url = self.config.base_url.as_deref()
                    .ok_or_else(|| anyhow::anyhow!("base_url required for {:?}", self.config.provider))?;
                self.call_openai(system, user, Some(base_url)).await
            }
        }
    }

    /// Call Anthropic using rig-core
    async fn call_anthropic(&self, system: &str, user: &str) -> Result<String, anyhow::Error> {
        use rig::client::{CompletionClient, ProviderClient};
        use rig::completion::Prompt;
        use rig::providers::anthropic;

        let api_key = self.config.api_key.as_ref()
            .ok_or_else(|| anyhow::anyhow!("Anthropic API key not configured"))?;

        // rig-core's Anthropic client reads its key from the environment
        std::env::set_var("ANTHROPIC_API_KEY", api_key);

        let client = anthropic::Client::from_env();
        let agent = client
            .agent(&self.config.model)
            .preamble(system)
            .temperature(self.config.temperature as f64)
            .max_tokens(self.config.max_tokens as u64)
            .build();

        let response = agent.prompt(user).await?;
        Ok(response)
    }

    /// Call OpenRouter using rig-core's native openrouter provider
    async fn call_openrouter(&self, system: &str, user: &str) -> Result<String, anyhow::Error> {
        use rig::client::CompletionClient;
        use rig::completion::Prompt;
        use rig::providers::openrouter;

        let api_key = self.config.api_key.as_ref()
            .ok_or_else(|| anyhow::anyhow!("OpenRouter API key not configured"))?;

        let client: openrouter::Client = openrouter::Client::new(api_key)?;
        let agent = client
            .agent(&self.config.model)
            .preamble(system)
            .temperature(self.config.temperature as f64)
            .build();

        let response = agent.prompt(user).await?;
        Ok(response)
    }

    /// Call OpenAI or an OpenAI-compatible API using rig-core
    async fn call_openai(&self, system: &str, user: &str, base_url: Option<&str>) -> Result<String, anyhow::Error> {
        use rig::client::CompletionClient;
        use rig::completion::Prompt;
        use rig::providers::openai;

        let api_key = self.config.api_key.as_ref()
            .ok_or_else(|| anyhow::anyhow!("OpenAI API key not configured"))?;

        let client: openai::Client = match base_url {
            Some(url) => openai::Client::builder()
                .api_key(api_key)
                .base_url(url)
                .build()?,
            None => openai::Client::new(api_key)?,
        };

        let agent = client
            .agent(&self.config.model)
            .preamble(system)
            .temperature(self.config.temperature as f64)
            .build();

        let response = agent.prompt(user).await?;
        Ok(response)
    }
}

#[async_trait]
impl AsyncCompletion for LlmProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse, anyhow::Error> {
        let (system, prompt) = Self::render_transcript(&messages);
        log::debug!(
            "{:?} completion over {} messages ({} prompt chars)",
            self.config.provider,
            messages.len(),
            prompt.len()
        );

        let content = self.call_llm(&system, &prompt).await?;

        Ok(LlmResponse {
            content,
            model: self.config.model.clone(),
            tokens_used: None,
            finish_reason: Some("stop".to_string()),
        })
    }
}
