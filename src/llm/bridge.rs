//! Blocking Bridge - synchronous access to async completion providers
//!
//! The agent loop and the Rhai sandbox are synchronous, while the real providers
//! are async. A dedicated runtime thread owns the providers; callers block on a
//! oneshot reply instead of spinning up a runtime per call.
//!
//! ```text
//! ┌──────────────────┐     mpsc::channel      ┌──────────────────────┐
//! │    AgentLoop     │ ─────────────────────> │   BlockingBackend    │
//! │  (sync, maybe    │                        │  (dedicated tokio    │
//! │   nested query)  │ <───────────────────── │   runtime thread)    │
//! └──────────────────┘     oneshot::channel   └──────────────────────┘
//! ```
//!
//! `complete` must not be called from inside a tokio runtime worker thread.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::{AsyncCompletion, CompletionBackend, LlmResponse, Message};

struct CompletionRequest {
    messages: Vec<Message>,
    response_tx: oneshot::Sender<Result<LlmResponse, anyhow::Error>>,
}

/// Synchronous [`CompletionBackend`] over any [`AsyncCompletion`]
pub struct BlockingBackend {
    request_tx: mpsc::Sender<CompletionRequest>,
    label: String,
}

impl BlockingBackend {
    /// Start the worker thread that drives `provider`
    pub fn new(provider: Arc<dyn AsyncCompletion>, label: &str) -> Result<Self, anyhow::Error> {
        let (request_tx, mut request_rx) = mpsc::channel::<CompletionRequest>(16);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rlm-llm-worker")
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("rlm-llm-bridge".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(request) = request_rx.recv().await {
                        let provider = provider.clone();
                        tokio::spawn(async move {
                            let result = provider.complete(request.messages).await;
                            let _ = request.response_tx.send(result);
                        });
                    }
                });
                log::debug!("Completion bridge worker stopped");
            })?;

        Ok(Self {
            request_tx,
            label: label.to_string(),
        })
    }
}

impl CompletionBackend for BlockingBackend {
    fn complete(&self, messages: &[Message]) -> Result<String, anyhow::Error> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .blocking_send(CompletionRequest { messages: messages.to_vec(), response_tx })
            .map_err(|_| anyhow::anyhow!("{} worker is not running", self.label))?;

        let response = response_rx
            .blocking_recv()
            .map_err(|_| anyhow::anyhow!("{} worker dropped the response channel", self.label))??;

        Ok(response.content)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
