// RLM-Agent: Recursive Language Model agent
// A model solves a task by writing Rhai code into a persistent sandbox and by
// calling query() to hand sub-tasks to fresh copies of itself.

pub mod error;

// LLM abstraction layer - providers, retries, blocking bridge, prompts
pub mod llm;

// Agent loop, sandbox, recursion and termination
pub mod rlm_core;

pub use error::RlmError;
pub use llm::{connect, CompletionBackend, LlmConfig, Message, ProviderType, Role, ScriptedBackend};
pub use rlm_core::{
    AgentLoop, ExecutionResult, ExecutionSandbox, IdleTurnPolicy, MarkerRule, RLMConfig, RLMResult, RecursionContext,
    RecursionGate, RunStatus, EXHAUSTION_MESSAGE,
};
