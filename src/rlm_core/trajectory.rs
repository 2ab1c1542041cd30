// RLM-Agent: Run trajectory
// Per-run record of what the loop did, returned alongside the answer.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Maximum characters kept in trajectory previews
const PREVIEW_CHARS: usize = 120;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// A final answer was detected (or accepted from an idle turn)
    Answered,
    /// The step budget ran out first
    Exhausted,
}

/// Result of an RLM execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RLMResult {
    pub run_id: String,
    pub status: RunStatus,
    /// The final answer, or the exhaustion message
    pub output: String,
    /// Number of model turns used
    pub steps: usize,
    /// Number of query() calls from this run's sandbox that ran a sub-agent.
    /// Depth refusals are not counted.
    pub sub_calls: usize,
    /// Recursion depth this run executed at
    pub depth: usize,
    pub trajectory: Vec<RLMTrajectoryStep>,
    /// Execution faults observed in submitted code
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

impl RLMResult {
    pub fn is_answered(&self) -> bool {
        self.status == RunStatus::Answered
    }
}

/// A step in the execution trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RLMTrajectoryStep {
    pub step: usize,
    pub operation: RLMOperation,
    pub description: String,
    /// Timestamp (ms since run start)
    pub timestamp_ms: u64,
}

/// Where a final answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerSource {
    ModelResponse,
    ExecutionOutput,
    IdleResponse,
}

/// Types of RLM operations for trajectory tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RLMOperation {
    Start,
    /// A completion was received from the backend
    ModelTurn { turn: usize, code_blocks: usize },
    CodeExecuted { success: bool, stdout_len: usize },
    /// Made a recursive query() call
    SubQuery { prompt_preview: String, depth: usize },
    /// Received result from sub-query
    SubResult { result_preview: String },
    /// query() was refused because the depth limit was reached
    DepthRefused { depth: usize },
    /// Turn without code or answer
    IdleTurn { turn: usize },
    Final { answer_preview: String, source: AnswerSource },
    Exhausted { steps: usize },
}

/// Shorten `text` to a one-line preview
pub fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}

/// Mutable run bookkeeping, shared between the loop and its query handler
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub depth: usize,
    pub steps: usize,
    pub sub_calls: usize,
    pub errors: Vec<String>,
    trajectory: Vec<RLMTrajectoryStep>,
    start_time: Instant,
}

impl RunState {
    pub fn new(depth: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            depth,
            steps: 0,
            sub_calls: 0,
            errors: Vec::new(),
            trajectory: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Add a trajectory step
    pub fn add_step(&mut self, operation: RLMOperation, description: impl Into<String>) {
        self.trajectory.push(RLMTrajectoryStep {
            step: self.trajectory.len(),
            operation,
            description: description.into(),
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
        });
    }

    pub fn trajectory(&self) -> &[RLMTrajectoryStep] {
        &self.trajectory
    }

    /// Snapshot the run into a result
    pub fn finish(&self, status: RunStatus, output: String) -> RLMResult {
        RLMResult {
            run_id: self.run_id.clone(),
            status,
            output,
            steps: self.steps,
            sub_calls: self.sub_calls,
            depth: self.depth,
            trajectory: self.trajectory.clone(),
            errors: self.errors.clone(),
            execution_time_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }
}
