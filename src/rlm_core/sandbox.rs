// RLM-Agent: Execution sandbox
// A persistent Rhai namespace that runs model-submitted code one submission at
// a time. Top-level `let` bindings and `fn` definitions survive between
// submissions; print/debug output is captured per submission.
//
// This is NOT a security boundary. Code runs with whatever the Rhai engine
// exposes plus the capability table below; only feed it trusted input.

use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope, AST};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::config::SandboxLimits;
use super::termination::VariableSource;
use crate::error::RlmError;

/// Outcome of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// `"<Category>: <message>"` when the submission faulted
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Render as the observation message fed back to the model
    pub fn to_observation(&self, max_chars: usize) -> String {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", self.stdout.trim_end()));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", self.stderr.trim_end()));
        }
        let body = if parts.is_empty() { "No output".to_string() } else { parts.join("\n\n") };

        let total = body.chars().count();
        let body = if total > max_chars {
            let kept: String = body.chars().take(max_chars).collect();
            format!("{}... [truncated, total {} chars]", kept, total)
        } else {
            body
        };

        format!("Execution result (success: {})\n{}", self.success, body)
    }
}

/// The host side of `query()`
pub trait QueryHandler: Send + Sync {
    /// Answer a sub-query. `Err` is a backend fault and ends the whole run.
    fn query(&self, prompt: &str) -> Result<String, RlmError>;
}

/// Used by standalone sandboxes that have no model behind them
struct NoQueries;

impl QueryHandler for NoQueries {
    fn query(&self, _prompt: &str) -> Result<String, RlmError> {
        Ok("Error: query() is not available in a standalone sandbox".to_string())
    }
}

/// A host function exposed to sandboxed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub name: &'static str,
    pub signature: &'static str,
    pub summary: &'static str,
}

/// The fixed set of host functions every sandbox gets
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityTable {
    pub version: u32,
    pub capabilities: Vec<Capability>,
}

impl CapabilityTable {
    pub const VERSION: u32 = 1;

    pub fn standard() -> Self {
        Self {
            version: Self::VERSION,
            capabilities: vec![
                Capability {
                    name: "query",
                    signature: "query(text) -> string",
                    summary: "ask a fresh sub-agent (same model, empty sandbox) and get its final answer",
                },
                Capability {
                    name: "query_batch",
                    signature: "query_batch([text, ...]) -> [string, ...]",
                    summary: "run several sub-queries one after another, answers in the same order",
                },
            ],
        }
    }

    /// One line per capability, for the system preamble
    pub fn describe(&self) -> String {
        self.capabilities
            .iter()
            .map(|c| format!("- {}: {}", c.signature, c.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn install(&self, engine: &mut Engine, handler: Arc<dyn QueryHandler>, fault: Arc<Mutex<Option<RlmError>>>) {
        for capability in &self.capabilities {
            match capability.name {
                "query" => {
                    let handler = handler.clone();
                    let fault = fault.clone();
                    engine.register_fn("query", move |prompt: &str| -> Result<String, Box<EvalAltResult>> {
                        ask(handler.as_ref(), &fault, prompt)
                    });
                }
                "query_batch" => {
                    let handler = handler.clone();
                    let fault = fault.clone();
                    engine.register_fn(
                        "query_batch",
                        move |prompts: rhai::Array| -> Result<rhai::Array, Box<EvalAltResult>> {
                            let mut answers = rhai::Array::with_capacity(prompts.len());
                            for prompt in prompts {
                                let answer = ask(handler.as_ref(), &fault, &dynamic_to_text(prompt))?;
                                answers.push(Dynamic::from(answer));
                            }
                            Ok(answers)
                        },
                    );
                }
                other => log::warn!("Capability '{}' has no host binding", other),
            }
        }
    }
}

/// Run one sub-query; a backend fault is parked and the script is terminated
fn ask(
    handler: &dyn QueryHandler,
    fault: &Mutex<Option<RlmError>>,
    prompt: &str,
) -> Result<String, Box<EvalAltResult>> {
    match handler.query(prompt) {
        Ok(answer) => Ok(answer),
        Err(err) => {
            let message = err.to_string();
            if let Ok(mut slot) = fault.lock() {
                slot.get_or_insert(err);
            }
            Err(EvalAltResult::ErrorTerminated(Dynamic::from(message), Position::NONE).into())
        }
    }
}

fn dynamic_to_text(value: Dynamic) -> String {
    if value.is_string() {
        value.into_string().unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Category label for a runtime fault
fn fault_category(err: &EvalAltResult) -> &'static str {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) | EvalAltResult::ErrorInModule(_, inner, _) => {
            fault_category(inner)
        }
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorVariableNotFound(..) => "NameError",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFoundError",
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..)
        | EvalAltResult::ErrorDotExpr(..) => "TypeError",
        EvalAltResult::ErrorArrayBounds(..)
        | EvalAltResult::ErrorStringBounds(..)
        | EvalAltResult::ErrorBitFieldBounds(..)
        | EvalAltResult::ErrorIndexNotFound(..) => "IndexError",
        EvalAltResult::ErrorPropertyNotFound(..) => "PropertyError",
        EvalAltResult::ErrorAssignmentToConstant(..) | EvalAltResult::ErrorNonPureMethodCallOnConstant(..) => {
            "ConstantError"
        }
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorTooManyVariables(..)
        | EvalAltResult::ErrorTooManyModules(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..) => "LimitError",
        EvalAltResult::ErrorTerminated(..) => "Terminated",
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        _ => "ExecutionError",
    }
}

fn describe_fault(err: &EvalAltResult) -> String {
    match err {
        // The default display drops the termination token
        EvalAltResult::ErrorTerminated(token, _) => format!("Terminated: {}", token),
        _ => format!("{}: {}", fault_category(err), err),
    }
}

/// Persistent execution namespace for one agent run
pub struct ExecutionSandbox {
    engine: Engine,
    scope: Scope<'static>,
    /// Accumulated `fn` definitions from earlier submissions
    functions: AST,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    backend_fault: Arc<Mutex<Option<RlmError>>>,
    capabilities: CapabilityTable,
}

impl ExecutionSandbox {
    /// Create a sandbox whose `query()` calls go to `handler`
    pub fn new(handler: Arc<dyn QueryHandler>, limits: &SandboxLimits) -> Self {
        let mut engine = Engine::new();
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let backend_fault = Arc::new(Mutex::new(None));

        let out = stdout.clone();
        engine.on_print(move |text| {
            if let Ok(mut buf) = out.lock() {
                buf.push_str(text);
                buf.push('\n');
            }
        });
        let err = stderr.clone();
        engine.on_debug(move |text, _source, _pos| {
            if let Ok(mut buf) = err.lock() {
                buf.push_str(text);
                buf.push('\n');
            }
        });

        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        if limits.max_call_levels > 0 {
            engine.set_max_call_levels(limits.max_call_levels);
        }

        let capabilities = CapabilityTable::standard();
        capabilities.install(&mut engine, handler, backend_fault.clone());

        Self {
            engine,
            scope: Scope::new(),
            functions: AST::empty(),
            stdout,
            stderr,
            backend_fault,
            capabilities,
        }
    }

    /// A sandbox with no model behind `query()`
    pub fn standalone(limits: &SandboxLimits) -> Self {
        Self::new(Arc::new(NoQueries), limits)
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Execute one submission against the persistent namespace.
    ///
    /// Faults never escape: they are reported through `success`, `error` and
    /// `stderr`. Statements that ran before a fault keep their effects.
    pub fn execute(&mut self, code: &str) -> ExecutionResult {
        self.drain(&self.stdout);
        self.drain(&self.stderr);

        let outcome = self.run(code);

        let stdout = self.drain(&self.stdout);
        let mut stderr = self.drain(&self.stderr);

        match outcome {
            Ok(()) => ExecutionResult { stdout, stderr, success: true, error: None },
            Err(fault) => {
                log::debug!("Sandbox fault: {}", fault);
                stderr.push_str(&fault);
                stderr.push('\n');
                ExecutionResult { stdout, stderr, success: false, error: Some(fault) }
            }
        }
    }

    fn run(&mut self, code: &str) -> Result<(), String> {
        let ast = self
            .engine
            .compile(code)
            .map_err(|e| format!("SyntaxError: {}", e))?;

        let program = self.functions.merge(&ast);
        // Definitions are hoisted, so they are kept even if the body faults
        self.functions = self.functions.merge(&ast.clone_functions_only());

        self.engine
            .run_ast_with_scope(&mut self.scope, &program)
            .map_err(|e| describe_fault(&e))
    }

    fn drain(&self, buffer: &Mutex<String>) -> String {
        buffer.lock().map(|mut b| std::mem::take(&mut *b)).unwrap_or_default()
    }

    /// Backend fault raised by a `query()` during the last submission, if any
    pub fn take_backend_fault(&self) -> Option<RlmError> {
        self.backend_fault.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Current value of a top-level variable; strings come back unquoted
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.scope.get_value::<Dynamic>(name).map(dynamic_to_text)
    }

    /// Bind a string variable, shadowing a constant of the same name
    pub fn set_variable(&mut self, name: &str, value: &str) {
        if self.scope.is_constant(name) == Some(true) {
            self.scope.push(name.to_string(), value.to_string());
        } else {
            self.scope.set_value(name.to_string(), value.to_string());
        }
    }

    /// Names of all top-level variables, in definition order
    pub fn variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _, _) in self.scope.iter() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl VariableSource for ExecutionSandbox {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get_variable(name)
    }
}
