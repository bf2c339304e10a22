//! Contract between the RPC layer and an external durable queue engine.
//!
//! The RPC layer only ever creates queues, builds and saves jobs, starts a
//! consumer, listens to events, and tears queues down. Persistence, delivery,
//! retries, timers, and stall detection belong to the engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{EngineError, JobFailure};
use crate::job::{Job, JobOutcome};
use crate::options::JobOption;

/// Future returned by a job handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;

/// Per-job callback installed by a consumer.
pub type JobHandler = Arc<dyn Fn(Job) -> HandlerFuture + Send + Sync>;

/// Queue-wide lifecycle and status events.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Ready,
    Error { message: String },
    Failed { job_id: String, error: JobFailure },
    Stalled { job_id: String },
    Retrying { job_id: String, error: JobFailure },
    Progress { job_id: String, percent: u8 },
    Succeeded { job_id: String, result: Value },
}

/// Events concerning a single job, delivered to its [`JobHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(u8),
    Retrying(JobFailure),
    Succeeded(Value),
    Failed(JobFailure),
}

/// Creates queue handles bound to a name.
pub trait QueueEngine: Send + Sync {
    /// Create a handle for `name`. `options` is engine-specific and passed
    /// through untouched by the RPC layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are not understood by the engine.
    fn create_queue(
        &self,
        name: &str,
        options: &Map<String, Value>,
    ) -> Result<Arc<dyn QueueHandle>, EngineError>;
}

/// A connection to one named queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Start building a job carrying `data`.
    fn create_job(&self, data: Value) -> Box<dyn JobBuilder>;

    /// Start consuming with up to `concurrency` jobs in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if this handle cannot consume or already does.
    fn process(&self, concurrency: usize, handler: JobHandler) -> Result<(), EngineError>;

    /// Subscribe to queue-wide events.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    /// Resolves once the broker connection is usable.
    async fn ready(&self) -> Result<(), EngineError>;

    /// Stop consuming and disconnect. Idempotent.
    async fn close(&self) -> Result<(), EngineError>;

    /// Erase everything the broker holds for this queue. Idempotent.
    async fn destroy(&self) -> Result<(), EngineError>;
}

/// Builder for a job before it is persisted.
#[async_trait]
pub trait JobBuilder: Send {
    /// Apply one recognized option with its positional arguments.
    ///
    /// # Errors
    ///
    /// Returns an error for values the option cannot accept.
    fn configure(&mut self, option: JobOption, args: &[Value]) -> Result<(), EngineError>;

    /// Persist the job and return a handle to it.
    async fn save(self: Box<Self>) -> Result<JobHandle, EngineError>;
}

/// A persisted job, subscribed to its own events from before it was saved.
#[derive(Debug)]
pub struct JobHandle {
    pub id: String,
    events: broadcast::Receiver<JobEvent>,
}

impl JobHandle {
    #[must_use]
    pub fn new(id: impl Into<String>, events: broadcast::Receiver<JobEvent>) -> Self {
        Self {
            id: id.into(),
            events,
        }
    }

    /// Wait for the job to settle.
    ///
    /// The first terminal event wins; anything after it is never observed.
    ///
    /// # Errors
    ///
    /// `Ok(Err(failure))` is the job's own failure. `Err(Closed)` means the
    /// engine dropped the job's event channel before it settled.
    pub async fn settled(mut self) -> Result<JobOutcome, EngineError> {
        loop {
            match self.events.recv().await {
                Ok(JobEvent::Succeeded(result)) => return Ok(Ok(result)),
                Ok(JobEvent::Failed(failure)) => return Ok(Err(failure)),
                Ok(JobEvent::Progress(_) | JobEvent::Retrying(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = %self.id, skipped, "job event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EngineError::Closed),
            }
        }
    }
}
