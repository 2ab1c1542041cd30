// RLM-Agent: Recursion gate
// query() spawns a child agent one level deeper. The gate refuses before any
// child loop or sandbox exists once the depth limit is reached.

use std::sync::Arc;

use super::agent::AgentLoop;
use super::config::RLMConfig;
use super::trajectory::RLMResult;
use crate::error::RlmError;
use crate::llm::CompletionBackend;

/// Position of one agent in the recursion tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionContext {
    pub depth: usize,
    pub max_depth: usize,
    pub max_steps: usize,
}

impl RecursionContext {
    /// Context of a top-level agent
    pub fn root(config: &RLMConfig) -> Self {
        Self {
            depth: 0,
            max_depth: config.max_depth,
            max_steps: config.max_steps,
        }
    }

    /// Context for an agent spawned from this one
    pub fn child(&self) -> Self {
        Self { depth: self.depth + 1, ..*self }
    }

    /// Whether a child at `depth + 1` stays within `max_depth`
    pub fn can_recurse(&self) -> bool {
        self.depth < self.max_depth
    }
}

/// Diagnostic returned to sandboxed code when query() is refused
pub fn refusal_message(max_depth: usize) -> String {
    format!("Error: maximum recursion depth ({}) reached, query() is unavailable", max_depth)
}

/// What happened to a sub-query
#[derive(Debug, Clone)]
pub enum SubQueryOutcome {
    Refused(String),
    Completed(RLMResult),
}

/// Builds and runs child agents that share the parent's backend and configuration
#[derive(Clone)]
pub struct RecursionGate {
    backend: Arc<dyn CompletionBackend>,
    config: Arc<RLMConfig>,
}

impl RecursionGate {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: Arc<RLMConfig>) -> Self {
        Self { backend, config }
    }

    /// Run `query` in a fresh child agent, or refuse if the depth limit is reached
    pub fn spawn_child(&self, context: RecursionContext, query: &str) -> Result<SubQueryOutcome, RlmError> {
        if !context.can_recurse() {
            log::warn!(
                "Refusing sub-query at depth {}: limit is {}",
                context.depth,
                context.max_depth
            );
            return Ok(SubQueryOutcome::Refused(refusal_message(context.max_depth)));
        }

        let child_context = context.child();
        log::debug!("Spawning child agent at depth {}", child_context.depth);

        let mut child = AgentLoop::from_parts(self.backend.clone(), self.config.clone(), child_context)?;
        let result = child.run(query)?;
        Ok(SubQueryOutcome::Completed(result))
    }

    /// Like [`spawn_child`](Self::spawn_child), flattened to the text handed back to code
    pub fn spawn(&self, context: RecursionContext, query: &str) -> Result<String, RlmError> {
        Ok(match self.spawn_child(context, query)? {
            SubQueryOutcome::Refused(message) => message,
            SubQueryOutcome::Completed(result) => result.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedBackend;

    #[test]
    fn test_child_context_increments_depth_only() {
        let root = RecursionContext::root(&RLMConfig::default().with_max_depth(3).with_max_steps(7));
        let child = root.child();
        assert_eq!(root.depth, 0);
        assert_eq!(child.depth, 1);
        assert_eq!(child.max_depth, 3);
        assert_eq!(child.max_steps, 7);
    }

    #[test]
    fn test_can_recurse_boundary() {
        let root = RecursionContext::root(&RLMConfig::default().with_max_depth(1));
        assert!(root.can_recurse());
        assert!(!root.child().can_recurse());

        let flat = RecursionContext::root(&RLMConfig::default().with_max_depth(0));
        assert!(!flat.can_recurse());
    }

    #[test]
    fn test_refusal_makes_no_backend_call() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(unused)"));
        let config = RLMConfig::default().with_max_depth(0);
        let gate = RecursionGate::new(backend.clone(), Arc::new(config.clone()));

        let text = gate.spawn(RecursionContext::root(&config), "anything").unwrap();
        assert!(text.contains("maximum"));
        assert!(text.contains("depth"));
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_spawn_runs_child_at_next_depth() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(child answer)"));
        let config = RLMConfig::default().with_max_depth(2);
        let gate = RecursionGate::new(backend.clone(), Arc::new(config.clone()));

        match gate.spawn_child(RecursionContext::root(&config), "sub task").unwrap() {
            SubQueryOutcome::Completed(result) => {
                assert_eq!(result.output, "child answer");
                assert_eq!(result.depth, 1);
            }
            SubQueryOutcome::Refused(message) => panic!("unexpected refusal: {}", message),
        }

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][0].content.contains("Depth: 1/2"));
        assert_eq!(calls[0][1].content, "sub task");
    }

    #[test]
    fn test_child_backend_fault_is_an_error() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(x)").fail_when_contains("sub", "quota exceeded"));
        let config = RLMConfig::default();
        let gate = RecursionGate::new(backend, Arc::new(config.clone()));

        let err = gate.spawn(RecursionContext::root(&config), "sub task").unwrap_err();
        assert!(matches!(err, RlmError::Backend(ref m) if m.contains("quota exceeded")));
    }
}
