//! Mock backends and stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{AuditEntry, StageOutput, StageResult};
use crate::errors::DraftflowError;
use crate::invoke::{CallOptions, GenerativeBackend, TransportError};
use crate::stages::{Stage, StageContext, StageContract};

/// One scripted backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Return this text.
    Respond(String),
    /// Fail with this transport error.
    Fail(TransportError),
}

/// A backend that replays a script and records every call.
///
/// Replies are chosen in this order: the first route whose key occurs in the
/// prompt, then the next queued reply, then the default response. With none
/// of these the call is rejected.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    routes: Vec<(String, String)>,
    queue: Mutex<VecDeque<ScriptedReply>>,
    default_response: Option<String>,
    latency: Option<Duration>,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<CallOptions>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(ScriptedReply::Respond(text.into()));
        self
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn fail(self, error: TransportError) -> Self {
        self.queue.lock().push_back(ScriptedReply::Fail(error));
        self
    }

    /// Answers every prompt containing `key` with `text`.
    #[must_use]
    pub fn route(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.routes.push((key.into(), text.into()));
        self
    }

    /// Sets the response used once the queue is empty.
    #[must_use]
    pub fn with_default_response(mut self, text: impl Into<String>) -> Self {
        self.default_response = Some(text.into());
        self
    }

    /// Delays every reply.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns how many calls were made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Returns the options of the most recent call.
    #[must_use]
    pub fn last_options(&self) -> Option<CallOptions> {
        self.options.lock().last().cloned()
    }

    fn next_reply(&self, prompt: &str) -> ScriptedReply {
        if let Some((_, text)) = self.routes.iter().find(|(key, _)| prompt.contains(key.as_str())) {
            return ScriptedReply::Respond(text.clone());
        }
        if let Some(reply) = self.queue.lock().pop_front() {
            return reply;
        }
        match &self.default_response {
            Some(text) => ScriptedReply::Respond(text.clone()),
            None => ScriptedReply::Fail(TransportError::Rejected("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, options: &CallOptions) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        self.options.lock().push(options.clone());
        let reply = self.next_reply(prompt);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            ScriptedReply::Respond(text) => Ok(text),
            ScriptedReply::Fail(err) => Err(err),
        }
    }
}

/// One recorded stage execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExecution {
    /// Run id from the context.
    pub run_id: String,
    /// Declared inputs as seen by the stage.
    pub inputs: BTreeMap<String, Option<serde_json::Value>>,
}

/// A stage that records each execution and writes fixed values.
///
/// It can be told to fail fatally a number of times, or to take a while,
/// which makes it useful for resume and interruption tests.
#[derive(Debug)]
pub struct RecordingStage {
    id: String,
    contract: StageContract,
    writes: Vec<(String, serde_json::Value)>,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    executions: Mutex<Vec<RecordedExecution>>,
    started: AtomicUsize,
}

impl RecordingStage {
    /// Creates a stage with no reads or writes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contract: StageContract::new(),
            writes: Vec::new(),
            failures_left: AtomicUsize::new(0),
            delay: None,
            executions: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
        }
    }

    /// Declares reads.
    #[must_use]
    pub fn reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contract = self.contract.reads(keys);
        self
    }

    /// Declares and performs a write.
    #[must_use]
    pub fn writes(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        self.contract = self.contract.writes([key.clone()]);
        self.writes.push((key, value));
        self
    }

    /// Fails fatally on the next `times` executions.
    #[must_use]
    pub fn failing_times(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Sleeps before completing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns completed executions.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().clone()
    }

    /// Returns the number of completed executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    /// Returns the number of started executions, including abandoned ones.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn contract(&self) -> &StageContract {
        &self.contract
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        self.started.fetch_add(1, Ordering::SeqCst);

        let mut inputs = BTreeMap::new();
        for key in &self.contract.reads {
            inputs.insert(key.clone(), ctx.input_opt(key)?.cloned());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DraftflowError::stage_execution(&self.id, "scripted failure"));
        }

        self.executions.lock().push(RecordedExecution {
            run_id: ctx.run_id().to_string(),
            inputs,
        });

        let mut output = StageOutput::ok_empty();
        for (key, value) in &self.writes {
            output.delta.insert(key, value.clone());
        }
        output.record(AuditEntry::new(&self.id, &self.id), false);
        Ok(output)
    }
}
