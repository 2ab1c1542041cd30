// RLM-Agent: Error types
// Only backend faults and configuration mistakes reach the caller; everything
// that happens inside sandboxed code is turned into conversation content.

/// Errors surfaced to the caller of an agent run
#[derive(Debug, Clone, thiserror::Error)]
pub enum RlmError {
    /// The completion backend failed; the run cannot continue
    #[error("Completion backend error: {0}")]
    Backend(String),

    /// The agent was configured with an unsupported combination of options
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reading a configuration or script file failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for RlmError {
    fn from(err: anyhow::Error) -> Self {
        RlmError::Backend(format!("{:#}", err))
    }
}

impl From<std::io::Error> for RlmError {
    fn from(err: std::io::Error) -> Self {
        RlmError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RlmError {
    fn from(err: serde_json::Error) -> Self {
        RlmError::Config(format!("Malformed configuration: {}", err))
    }
}
