//! Mode dispatch over one or more providers.
//!
//! - **chat**: one `generate` call on the chat provider.
//! - **workers**: the same task sent to every worker concurrently; all must
//!   succeed, results come back in declaration order.
//! - **ralph loop**: the chat provider refines its own output for a bounded
//!   number of sequential iterations.
//!
//! An [`Orchestrator`] is built per request and holds no state between calls.

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use sovereign_rag_core::models::{GenerationResult, Message};

use crate::error::{Error, Result};
use crate::providers::{Provider, TextStream};

pub const WORKER_SYSTEM_PROMPT: &str = "You are a specialized worker agent.";
pub const RALPH_SYSTEM_PROMPT: &str =
    "You are part of a RALPH loop. Refine and iterate on the task.";

/// Hard upper bound on ralph iterations.
pub const MAX_RALPH_ITERATIONS: u32 = 10;

pub struct Orchestrator {
    chat: Arc<dyn Provider>,
    workers: Vec<Arc<dyn Provider>>,
    worker_timeout: Option<Duration>,
    max_iterations: u32,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn Provider>) -> Self {
        Self {
            chat,
            workers: Vec::new(),
            worker_timeout: None,
            max_iterations: MAX_RALPH_ITERATIONS,
        }
    }

    pub fn with_workers(mut self, workers: Vec<Arc<dyn Provider>>) -> Self {
        self.workers = workers;
        self
    }

    /// Fail a worker that has not answered within `timeout`.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Lower the ralph iteration cap. Values above [`MAX_RALPH_ITERATIONS`] are ignored.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.clamp(1, MAX_RALPH_ITERATIONS);
        self
    }

    pub fn chat_provider(&self) -> &Arc<dyn Provider> {
        &self.chat
    }

    pub async fn chat(&self, messages: &[Message]) -> Result<GenerationResult> {
        debug!(model = %self.chat.model(), "chat");
        self.chat.generate(messages).await
    }

    /// Stream from the chat provider, or deliver the whole answer as one
    /// chunk when it cannot stream.
    pub async fn stream_chat(&self, messages: &[Message]) -> Result<TextStream> {
        if self.chat.supports_streaming() {
            return self.chat.stream(messages).await;
        }

        let result = self.chat.generate(messages).await?;
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh receiver: this send cannot fail.
        let _ = tx.send(Ok(result.content)).await;
        Ok(rx)
    }

    /// Send `task` to every worker at once.
    ///
    /// The first failure fails the whole fan-out and drops the remaining
    /// in-flight calls.
    pub async fn run_workers(&self, task: &str) -> Result<Vec<GenerationResult>> {
        let messages = [Message::system(WORKER_SYSTEM_PROMPT), Message::user(task)];
        info!(workers = self.workers.len(), "starting worker fan-out");

        let calls = self
            .workers
            .iter()
            .map(|worker| self.run_worker(worker.as_ref(), &messages));

        let results = try_join_all(calls).await?;
        debug!(completed = results.len(), "worker fan-out complete");
        Ok(results)
    }

    async fn run_worker(&self, worker: &dyn Provider, messages: &[Message]) -> Result<GenerationResult> {
        let Some(limit) = self.worker_timeout else {
            return worker.generate(messages).await;
        };
        match tokio::time::timeout(limit, worker.generate(messages)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                model: worker.model().to_string(),
                endpoint: worker.endpoint().to_string(),
                secs: limit.as_secs(),
            }),
        }
    }

    /// Refine `task` over `iterations` sequential rounds (clamped to the
    /// configured range). Returns one result per round, in order.
    pub async fn ralph_loop(&self, task: &str, iterations: u32) -> Result<Vec<GenerationResult>> {
        let n = iterations.clamp(1, self.max_iterations);
        info!(model = %self.chat.model(), iterations = n, "starting ralph loop");

        let mut results = Vec::with_capacity(n as usize);
        let mut current = task.to_string();

        for i in 0..n {
            let messages = [Message::system(RALPH_SYSTEM_PROMPT), Message::user(current)];
            let result = self.chat.generate(&messages).await?;
            debug!(iteration = i + 1, chars = result.content.len(), "ralph iteration done");
            current = refine_prompt(&result.content);
            results.push(result);
        }

        Ok(results)
    }
}

fn refine_prompt(previous: &str) -> String {
    format!("Previous iteration result: {previous}\n\nRefine and improve this result.")
}
