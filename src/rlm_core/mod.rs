// RLM-Agent: Core agent runtime
// extract -> termination -> sandbox -> recursion -> agent, leaves first.

pub mod agent;
pub mod config;
pub mod extract;
pub mod recursion;
pub mod sandbox;
pub mod termination;
pub mod trajectory;

pub use agent::{AgentLoop, CONTEXT_VARIABLE, EXHAUSTION_MESSAGE};
pub use config::{IdleTurnPolicy, RLMConfig, SandboxLimits};
pub use extract::CodeBlockExtractor;
pub use recursion::{RecursionContext, RecursionGate, SubQueryOutcome};
pub use sandbox::{Capability, CapabilityTable, ExecutionResult, ExecutionSandbox, QueryHandler};
pub use termination::{FinalAnswer, MarkerRule, TerminationDetector, VariableSource};
pub use trajectory::{AnswerSource, RLMOperation, RLMResult, RLMTrajectoryStep, RunStatus};
