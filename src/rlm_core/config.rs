// RLM-Agent: Run configuration
// Everything an agent (and every agent it spawns) is configured with.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::termination::MarkerRule;
use crate::error::RlmError;

/// What the loop does when a turn has neither code nor a final answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "message", rename_all = "snake_case")]
pub enum IdleTurnPolicy {
    /// Leave the conversation as is and ask the model again
    Continue,
    /// Append a corrective user message before the next turn
    Nudge(String),
    /// Treat the prose response itself as the final answer
    AcceptResponse,
}

/// Execution limits applied to every sandbox engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Maximum engine operations per submission (0 = unlimited)
    pub max_operations: u64,
    /// Maximum script function call nesting. 0 keeps the engine's built-in
    /// default (8 in debug builds, 64 in release builds); it is never unlimited.
    pub max_call_levels: usize,
    /// Maximum length of any string value (0 = unlimited)
    pub max_string_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_string_size: 0,
        }
    }
}

/// Configuration for an RLM run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RLMConfig {
    /// Maximum recursion depth for query() calls (0 = no sub-queries)
    pub max_depth: usize,
    /// Maximum model turns within a single agent run
    pub max_steps: usize,
    /// Language tag of the fenced blocks that get executed
    pub fence_tag: String,
    /// Enabled final-answer rules
    pub markers: Vec<MarkerRule>,
    /// Also look for final-answer markers in printed output
    pub detect_in_output: bool,
    /// Behavior on turns without code or answer
    pub idle_policy: IdleTurnPolicy,
    /// Observation messages are truncated to this many characters
    pub max_observation_chars: usize,
    /// Replaces the built-in system preamble when set
    pub system_preamble: Option<String>,
    pub sandbox: SandboxLimits,
}

impl Default for RLMConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_steps: 10,
            fence_tag: "repl".to_string(),
            markers: vec![MarkerRule::ByVariable, MarkerRule::ByValue],
            detect_in_output: true,
            idle_policy: IdleTurnPolicy::Continue,
            max_observation_chars: 5_000,
            system_preamble: None,
            sandbox: SandboxLimits::default(),
        }
    }
}

impl RLMConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RlmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RlmError::Io(format!("{}: {}", path.display(), e)))?;
        let config: RLMConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_markers(mut self, markers: Vec<MarkerRule>) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_idle_policy(mut self, policy: IdleTurnPolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    /// Reject option combinations the loop cannot honor
    pub fn validate(&self) -> Result<(), RlmError> {
        if self.max_steps == 0 {
            return Err(RlmError::Config("max_steps must be at least 1".to_string()));
        }
        if self.fence_tag.is_empty()
            || self.fence_tag.contains('`')
            || self.fence_tag.chars().any(char::is_whitespace)
        {
            return Err(RlmError::Config(format!("invalid fence tag '{}'", self.fence_tag)));
        }
        if self.markers.is_empty() {
            return Err(RlmError::Config("at least one final-answer marker must be enabled".to_string()));
        }
        let sentinel = self.markers.contains(&MarkerRule::BySentinel);
        if sentinel && self.markers.len() > 1 {
            return Err(RlmError::Config(
                "the sentinel convention cannot be mixed with FINAL/FINAL_VAR markers".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rlm_config_default() {
        let config = RLMConfig::default();
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.fence_tag, "repl");
        assert_eq!(config.markers, vec![MarkerRule::ByVariable, MarkerRule::ByValue]);
        assert!(config.detect_in_output);
        assert_eq!(config.idle_policy, IdleTurnPolicy::Continue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mixing_sentinel_with_markers_is_rejected() {
        let config = RLMConfig::default()
            .with_markers(vec![MarkerRule::ByValue, MarkerRule::BySentinel]);
        assert!(matches!(config.validate(), Err(RlmError::Config(_))));

        let sentinel_only = RLMConfig::default().with_markers(vec![MarkerRule::BySentinel]);
        assert!(sentinel_only.validate().is_ok());
    }

    #[test]
    fn test_empty_markers_and_zero_steps_are_rejected() {
        assert!(RLMConfig::default().with_markers(vec![]).validate().is_err());
        assert!(RLMConfig::default().with_max_steps(0).validate().is_err());
    }

    #[test]
    fn test_bad_fence_tags_are_rejected() {
        for tag in ["", "re pl", "r`epl"] {
            let config = RLMConfig { fence_tag: tag.to_string(), ..RLMConfig::default() };
            assert!(config.validate().is_err(), "tag {:?} should be rejected", tag);
        }
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_depth": 4, "idle_policy": {{"policy": "nudge", "message": "Write code."}}}}"#
        )
        .unwrap();

        let config = RLMConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.idle_policy, IdleTurnPolicy::Nudge("Write code.".to_string()));
    }

    #[test]
    fn test_from_file_reports_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(RLMConfig::from_file(file.path()), Err(RlmError::Config(_))));
    }

    #[test]
    fn test_from_file_missing_file() {
        let err = RLMConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, RlmError::Io(_)));
    }
}
