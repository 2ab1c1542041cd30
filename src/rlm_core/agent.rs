// RLM-Agent: Agent loop
// Drives one agent: ask the model, look for a final answer, run any code
// blocks in the sandbox, feed the results back, repeat until an answer or the
// step budget runs out.

use std::sync::{Arc, Mutex};

use super::config::{IdleTurnPolicy, RLMConfig};
use super::extract::CodeBlockExtractor;
use super::recursion::{RecursionContext, RecursionGate, SubQueryOutcome};
use super::sandbox::{CapabilityTable, ExecutionSandbox, QueryHandler};
use super::termination::TerminationDetector;
use super::trajectory::{preview, AnswerSource, RLMOperation, RLMResult, RunState, RunStatus};
use crate::error::RlmError;
use crate::llm::{CompletionBackend, Message, SystemPrompts};

/// Output of a run that used up its step budget
pub const EXHAUSTION_MESSAGE: &str = "Max iterations reached without final answer.";

/// Name of the sandbox variable filled by [`AgentLoop::run_with_context`]
pub const CONTEXT_VARIABLE: &str = "context";

fn with_state<R>(state: &Mutex<RunState>, f: impl FnOnce(&mut RunState) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// The sandbox's view of query(): a recursion gate bound to this agent's position
struct SubQueries {
    gate: RecursionGate,
    context: RecursionContext,
    state: Arc<Mutex<RunState>>,
}

impl QueryHandler for SubQueries {
    // Only completed sub-agents count as sub-calls; a refusal creates no child.
    fn query(&self, prompt: &str) -> Result<String, RlmError> {
        match self.gate.spawn_child(self.context, prompt)? {
            SubQueryOutcome::Refused(message) => {
                with_state(&self.state, |s| {
                    s.add_step(RLMOperation::DepthRefused { depth: self.context.depth }, message.clone())
                });
                Ok(message)
            }
            SubQueryOutcome::Completed(result) => {
                with_state(&self.state, |s| {
                    s.sub_calls += 1;
                    s.add_step(
                        RLMOperation::SubQuery { prompt_preview: preview(prompt), depth: self.context.depth + 1 },
                        "query() answered",
                    );
                    s.add_step(
                        RLMOperation::SubResult { result_preview: preview(&result.output) },
                        format!("sub-agent finished in {} steps", result.steps),
                    );
                });
                Ok(result.output)
            }
        }
    }
}

/// One recursive language model agent
pub struct AgentLoop {
    backend: Arc<dyn CompletionBackend>,
    config: Arc<RLMConfig>,
    context: RecursionContext,
    extractor: CodeBlockExtractor,
    detector: TerminationDetector,
    messages: Vec<Message>,
}

impl AgentLoop {
    /// Create a top-level agent. Fails on an invalid configuration.
    pub fn new(backend: Arc<dyn CompletionBackend>, config: RLMConfig) -> Result<Self, RlmError> {
        let context = RecursionContext::root(&config);
        Self::from_parts(backend, Arc::new(config), context)
    }

    pub(crate) fn from_parts(
        backend: Arc<dyn CompletionBackend>,
        config: Arc<RLMConfig>,
        context: RecursionContext,
    ) -> Result<Self, RlmError> {
        config.validate()?;
        let extractor = CodeBlockExtractor::new(&config.fence_tag)
            .map_err(|e| RlmError::Config(format!("fence tag '{}': {}", config.fence_tag, e)))?;
        let detector = TerminationDetector::new(&config.markers);

        Ok(Self {
            backend,
            config,
            context,
            extractor,
            detector,
            messages: Vec::new(),
        })
    }

    pub fn context(&self) -> RecursionContext {
        self.context
    }

    /// Conversation of the most recent run
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// System message for this agent, including its depth annotation
    pub fn system_prompt(&self) -> Result<String, RlmError> {
        let preamble = match &self.config.system_preamble {
            Some(custom) => custom.clone(),
            None => SystemPrompts::rlm_preamble(
                &self.config.fence_tag,
                &CapabilityTable::standard().describe(),
                &self.detector.instructions(),
            )
            .map_err(RlmError::Config)?,
        };
        Ok(format!(
            "{}\n\n{}",
            preamble.trim_end(),
            SystemPrompts::depth_annotation(self.context.depth, self.context.max_depth)
        ))
    }

    /// Run the agent on `prompt` and return only the output text
    pub fn completion(&mut self, prompt: &str) -> Result<String, RlmError> {
        self.run(prompt).map(|result| result.output)
    }

    pub fn run(&mut self, prompt: &str) -> Result<RLMResult, RlmError> {
        self.run_inner(prompt, None)
    }

    /// Run with a large input preloaded into the sandbox variable `context`
    pub fn run_with_context(&mut self, prompt: &str, context: &str) -> Result<RLMResult, RlmError> {
        self.run_inner(prompt, Some(context))
    }

    fn run_inner(&mut self, prompt: &str, context: Option<&str>) -> Result<RLMResult, RlmError> {
        let state = Arc::new(Mutex::new(RunState::new(self.context.depth)));
        let handler = SubQueries {
            gate: RecursionGate::new(self.backend.clone(), self.config.clone()),
            context: self.context,
            state: state.clone(),
        };
        let mut sandbox = ExecutionSandbox::new(Arc::new(handler), &self.config.sandbox);

        let mut task = prompt.to_string();
        if let Some(text) = context {
            sandbox.set_variable(CONTEXT_VARIABLE, text);
            task.push_str(&format!(
                "\n\nA string variable `{}` ({} chars) is loaded in the sandbox. Inspect it with code instead of asking for it.",
                CONTEXT_VARIABLE,
                text.chars().count()
            ));
        }

        self.messages = vec![Message::system(&self.system_prompt()?), Message::user(&task)];

        let run_id = with_state(&state, |s| {
            s.add_step(RLMOperation::Start, format!("depth {}: {}", self.context.depth, preview(prompt)));
            s.run_id.clone()
        });
        log::info!(
            "RLM run {} started at depth {}/{} with {} steps",
            run_id,
            self.context.depth,
            self.context.max_depth,
            self.context.max_steps
        );

        for turn in 1..=self.context.max_steps {
            with_state(&state, |s| s.steps = turn);

            let response = self.backend.complete(&self.messages)?;
            self.messages.push(Message::assistant(&response));

            if let Some(answer) = self.detector.detect(&response, &sandbox) {
                return Ok(self.answered(&state, answer, AnswerSource::ModelResponse));
            }

            let blocks = self.extractor.extract(&response);
            with_state(&state, |s| {
                s.add_step(
                    RLMOperation::ModelTurn { turn, code_blocks: blocks.len() },
                    format!("{} chars from {}", response.len(), self.backend.name()),
                )
            });
            log::debug!("Run {} turn {}: {} code block(s)", run_id, turn, blocks.len());

            if blocks.is_empty() {
                with_state(&state, |s| s.add_step(RLMOperation::IdleTurn { turn }, "no code and no answer"));
                match &self.config.idle_policy {
                    IdleTurnPolicy::Continue => {}
                    IdleTurnPolicy::Nudge(text) => self.messages.push(Message::user(text)),
                    IdleTurnPolicy::AcceptResponse => {
                        let answer = response.trim().to_string();
                        return Ok(self.answered(&state, answer, AnswerSource::IdleResponse));
                    }
                }
                continue;
            }

            for code in blocks {
                let result = sandbox.execute(&code);
                if let Some(fault) = sandbox.take_backend_fault() {
                    log::warn!("Run {} aborted by backend fault in a sub-query", run_id);
                    return Err(fault);
                }

                with_state(&state, |s| {
                    if let Some(error) = &result.error {
                        s.errors.push(error.clone());
                    }
                    s.add_step(
                        RLMOperation::CodeExecuted { success: result.success, stdout_len: result.stdout.len() },
                        preview(&code),
                    );
                });

                self.messages
                    .push(Message::user(&result.to_observation(self.config.max_observation_chars)));

                if self.config.detect_in_output {
                    if let Some(answer) = self.detector.detect(&result.stdout, &sandbox) {
                        return Ok(self.answered(&state, answer, AnswerSource::ExecutionOutput));
                    }
                }
            }
        }

        log::info!("Run {} exhausted {} steps", run_id, self.context.max_steps);
        Ok(with_state(&state, |s| {
            s.add_step(RLMOperation::Exhausted { steps: s.steps }, EXHAUSTION_MESSAGE);
            s.finish(RunStatus::Exhausted, EXHAUSTION_MESSAGE.to_string())
        }))
    }

    fn answered(&self, state: &Mutex<RunState>, answer: String, source: AnswerSource) -> RLMResult {
        with_state(state, |s| {
            log::info!("Run {} answered after {} step(s)", s.run_id, s.steps);
            s.add_step(
                RLMOperation::Final { answer_preview: preview(&answer), source },
                "final answer detected",
            );
            s.finish(RunStatus::Answered, answer)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, ScriptedBackend};
    use crate::rlm_core::termination::MarkerRule;

    fn agent(backend: &Arc<ScriptedBackend>, config: RLMConfig) -> AgentLoop {
        AgentLoop::new(backend.clone(), config).unwrap()
    }

    #[test]
    fn test_answer_in_first_response_skips_code() {
        let backend = Arc::new(ScriptedBackend::new("```repl\nprint(\"should not run\");\n```\nFINAL(done)"));
        let mut agent = agent(&backend, RLMConfig::default());

        let result = agent.run("task").unwrap();
        assert_eq!(result.output, "done");
        assert_eq!(result.steps, 1);
        assert_eq!(agent.messages().len(), 3);
        assert!(!result.trajectory.iter().any(|s| matches!(s.operation, RLMOperation::CodeExecuted { .. })));
    }

    #[test]
    fn test_seed_messages() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(ok)"));
        let mut agent = agent(&backend, RLMConfig::default());
        agent.run("What now?").unwrap();

        let first_call = &backend.calls()[0];
        assert_eq!(first_call.len(), 2);
        assert_eq!(first_call[0].role, Role::System);
        assert!(first_call[0].content.contains("Depth: 0/2"));
        assert!(first_call[0].content.contains("```repl"));
        assert_eq!(first_call[1], Message::user("What now?"));
    }

    #[test]
    fn test_one_observation_per_block() {
        let backend = Arc::new(
            ScriptedBackend::new("```repl\nlet a = 2;\n```\n```repl\nprint(a * 3);\n```")
                .when_contains("STDOUT:\n6", "FINAL(6)"),
        );
        let config = RLMConfig { detect_in_output: false, ..RLMConfig::default() };
        let mut agent = agent(&backend, config);

        let result = agent.run("go").unwrap();
        assert_eq!(result.output, "6");
        // system, user, assistant, two observations, assistant
        let roles: Vec<Role> = agent.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::User, Role::Assistant]
        );
        assert!(agent.messages()[3].content.contains("No output"));
    }

    #[test]
    fn test_final_var_resolves_from_sandbox() {
        let backend = Arc::new(
            ScriptedBackend::new("```repl\nlet answer = \"forty\" + \"-two\";\n```")
                .when_contains("Execution result", "FINAL_VAR(answer)"),
        );
        let mut agent = agent(&backend, RLMConfig::default());
        assert_eq!(agent.completion("go").unwrap(), "forty-two");
    }

    #[test]
    fn test_final_var_beside_its_code_is_read_before_the_code_runs() {
        let backend = Arc::new(ScriptedBackend::new("```repl\nlet answer = 42;\n```\nFINAL_VAR(answer)"));
        let mut agent = agent(&backend, RLMConfig::default());

        let result = agent.run("go").unwrap();
        assert_eq!(result.output, "Error: variable 'answer' not found in the sandbox");
        assert!(agent.system_prompt().unwrap().contains("later reply than the code that sets `name`"));
    }

    #[test]
    fn test_bare_sentinel_ends_the_run_with_an_empty_answer() {
        let backend = Arc::new(ScriptedBackend::new("Final Answer:"));
        let config = RLMConfig::default()
            .with_markers(vec![MarkerRule::BySentinel])
            .with_max_steps(3);
        let mut agent = agent(&backend, config);

        let result = agent.run("go").unwrap();
        assert_eq!(result.status, RunStatus::Answered);
        assert_eq!(result.output, "");
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn test_answer_detected_in_output() {
        // The marker is assembled at runtime so the response itself carries none
        let backend = Arc::new(ScriptedBackend::new(
            "```repl\nlet m = \"FIN\" + \"AL\";\nprint(`${m}(${6 * 7})`);\n```",
        ));
        let mut agent = agent(&backend, RLMConfig::default());

        let result = agent.run("go").unwrap();
        assert_eq!(result.output, "42");
        assert_eq!(backend.call_count(), 1);
        assert!(result.trajectory.iter().any(|s| matches!(
            s.operation,
            RLMOperation::Final { source: AnswerSource::ExecutionOutput, .. }
        )));
    }

    #[test]
    fn test_execution_faults_are_fed_back() {
        let backend = Arc::new(
            ScriptedBackend::new("```repl\nlet y = 1 / 0;\n```")
                .when_contains("ArithmeticError", "FINAL(recovered)"),
        );
        let mut agent = agent(&backend, RLMConfig::default());

        let result = agent.run("go").unwrap();
        assert_eq!(result.output, "recovered");
        assert_eq!(result.errors.len(), 1);
        assert!(agent.messages()[3].content.contains("success: false"));
    }

    #[test]
    fn test_idle_policies() {
        let backend = Arc::new(ScriptedBackend::new("Just prose."));
        let mut idle = agent(&backend, RLMConfig::default().with_max_steps(2));
        let result = idle.run("go").unwrap();
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(idle.messages().len(), 4);

        let nudged = Arc::new(ScriptedBackend::new("Just prose.").when_contains("Use code", "FINAL(ok)"));
        let mut nudge = agent(
            &nudged,
            RLMConfig::default().with_idle_policy(IdleTurnPolicy::Nudge("Use code.".to_string())),
        );
        assert_eq!(nudge.completion("go").unwrap(), "ok");
        assert_eq!(nudged.call_count(), 2);

        let accepting = Arc::new(ScriptedBackend::new("  Paris  "));
        let mut accept = agent(&accepting, RLMConfig::default().with_idle_policy(IdleTurnPolicy::AcceptResponse));
        assert_eq!(accept.completion("go").unwrap(), "Paris");
    }

    #[test]
    fn test_exhaustion_uses_exactly_max_steps_calls() {
        let backend = Arc::new(ScriptedBackend::new("```repl\nprint(1);\n```"));
        let mut agent = agent(&backend, RLMConfig::default().with_max_steps(3));

        let result = agent.run("loop forever").unwrap();
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(result.output, EXHAUSTION_MESSAGE);
        assert_eq!(result.steps, 3);
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn test_backend_error_ends_run() {
        let backend = Arc::new(ScriptedBackend::new("x").fail_when_contains("go", "rate limited"));
        let mut agent = agent(&backend, RLMConfig::default());
        assert!(matches!(agent.run("go"), Err(RlmError::Backend(_))));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let backend: Arc<dyn CompletionBackend> = Arc::new(ScriptedBackend::new("x"));
        let config = RLMConfig::default().with_markers(vec![MarkerRule::BySentinel, MarkerRule::ByValue]);
        assert!(matches!(AgentLoop::new(backend, config), Err(RlmError::Config(_))));
    }

    #[test]
    fn test_run_with_context_loads_variable() {
        let backend = Arc::new(
            ScriptedBackend::new("```repl\nprint(context.len());\n```")
                .when_contains("STDOUT:\n11", "FINAL_VAR(context)"),
        );
        let mut agent = agent(&backend, RLMConfig::default());

        let result = agent.run_with_context("How long is it?", "hello world").unwrap();
        assert_eq!(result.output, "hello world");
        assert!(backend.calls()[0][1].content.contains("(11 chars)"));
    }

    #[test]
    fn test_custom_preamble_keeps_depth_annotation() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(ok)"));
        let config = RLMConfig { system_preamble: Some("Be brief.".to_string()), ..RLMConfig::default() };
        let agent = agent(&backend, config);
        assert_eq!(agent.system_prompt().unwrap(), "Be brief.\n\nDepth: 0/2");
    }

    #[test]
    fn test_messages_reset_between_runs() {
        let backend = Arc::new(ScriptedBackend::new("FINAL(ok)"));
        let mut agent = agent(&backend, RLMConfig::default());
        agent.run("one").unwrap();
        agent.run("two").unwrap();
        assert_eq!(agent.messages().len(), 3);
        assert_eq!(agent.messages()[1].content, "two");
    }
}
