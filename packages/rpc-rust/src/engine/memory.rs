//! In-process [`QueueEngine`] backed by a shared [`MemoryBroker`].
//!
//! Several engines over one broker behave like several processes connected to
//! one broker server: a client engine saves jobs, a worker engine consumes
//! them, and settlement flows back through per-job channels held by the
//! broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use jobwire_core::{
    EngineError, Job, JobBuilder, JobEvent, JobFailure, JobHandle, JobHandler, JobOption,
    JobOutcome, JobSettings, ProgressSink, QueueEngine, QueueEvent, QueueHandle,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of each job's own event channel.
const JOB_EVENT_CAPACITY: usize = 16;

/// Failure attached to an attempt that exceeded its timeout.
pub const TIMED_OUT: &str = "Job timed out";

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// Shared broker state, keyed by `"{prefix}:{name}"`.
///
/// Cloning is cheap; clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<DashMap<String, Arc<QueueState>>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to be picked up on `prefix:name`.
    #[must_use]
    pub fn waiting(&self, prefix: &str, name: &str) -> usize {
        self.queues
            .get(&queue_key(prefix, name))
            .map_or(0, |state| state.waiting.lock().len())
    }

    /// Whether the broker holds any state for `prefix:name`.
    #[must_use]
    pub fn has_queue(&self, prefix: &str, name: &str) -> bool {
        self.queues.contains_key(&queue_key(prefix, name))
    }

    fn queue(&self, key: &str) -> Arc<QueueState> {
        Arc::clone(
            self.queues
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(QueueState::new()))
                .value(),
        )
    }

    fn existing(&self, key: &str) -> Option<Arc<QueueState>> {
        self.queues.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn remove(&self, key: &str) -> Option<Arc<QueueState>> {
        self.queues.remove(key).map(|(_, state)| state)
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("queues", &self.queues.len())
            .finish()
    }
}

fn queue_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

// ---------------------------------------------------------------------------
// QueueState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredJob {
    id: String,
    data: Value,
    settings: JobSettings,
    /// Retries already consumed.
    attempts: u32,
}

/// Everything the broker persists for one queue.
struct QueueState {
    waiting: Mutex<VecDeque<StoredJob>>,
    available: Notify,
    next_id: AtomicU64,
    job_events: DashMap<String, broadcast::Sender<JobEvent>>,
    destroyed: AtomicBool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            next_id: AtomicU64::new(1),
            job_events: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn push(&self, job: StoredJob) {
        if self.is_destroyed() {
            return;
        }
        self.waiting.lock().push_back(job);
        self.available.notify_one();
    }

    /// Wait for the next job. `None` once the queue is destroyed.
    async fn pop(&self) -> Option<StoredJob> {
        loop {
            let notified = self.available.notified();
            if self.is_destroyed() {
                return None;
            }
            let next = self.waiting.lock().pop_front();
            if next.is_some() {
                return next;
            }
            notified.await;
        }
    }

    /// Deliver `event` to whoever awaits job `id`. Terminal events release
    /// the channel.
    fn emit_job(&self, id: &str, event: JobEvent) {
        let terminal = matches!(event, JobEvent::Succeeded(_) | JobEvent::Failed(_));
        let sender = if terminal {
            self.job_events.remove(id).map(|(_, tx)| tx)
        } else {
            self.job_events.get(id).map(|tx| tx.value().clone())
        };
        if let Some(tx) = sender {
            let _ = tx.send(event);
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.waiting.lock().clear();
        self.job_events.clear();
        self.available.notify_waiters();
    }
}

/// Enqueue `job` now, or after `delay` if non-zero.
fn schedule(state: Arc<QueueState>, job: StoredJob, delay: Option<Duration>) {
    match delay.filter(|d| !d.is_zero()) {
        None => state.push(job),
        Some(delay) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                state.push(job);
            });
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryQueueOptions
// ---------------------------------------------------------------------------

/// Engine options, read from the camelCase JSON object handed to
/// [`QueueEngine::create_queue`]. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryQueueOptions {
    pub prefix: String,
    /// Only worker queues may consume.
    pub is_worker: bool,
    /// How long `close` waits for in-flight jobs before stalling them.
    pub close_timeout_ms: u64,
    /// Capacity of the queue-wide event channel.
    pub event_capacity: usize,
}

impl Default for MemoryQueueOptions {
    fn default() -> Self {
        Self {
            prefix: "bq".to_string(),
            is_worker: true,
            close_timeout_ms: 5000,
            event_capacity: 1024,
        }
    }
}

impl MemoryQueueOptions {
    /// Parse options from an engine options object.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a recognized key with the wrong type, or a zero
    /// event capacity.
    pub fn from_map(options: &Map<String, Value>) -> Result<Self, EngineError> {
        let parsed: Self = serde_json::from_value(Value::Object(options.clone()))
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        if parsed.event_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "eventCapacity must be at least 1".to_string(),
            ));
        }
        Ok(parsed)
    }

    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// Queue engine over a [`MemoryBroker`].
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    broker: MemoryBroker,
}

impl MemoryEngine {
    #[must_use]
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }

    #[must_use]
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

impl QueueEngine for MemoryEngine {
    fn create_queue(
        &self,
        name: &str,
        options: &Map<String, Value>,
    ) -> Result<Arc<dyn QueueHandle>, EngineError> {
        let options = MemoryQueueOptions::from_map(options)?;
        Ok(Arc::new(MemoryQueue::new(name, self.broker.clone(), options)))
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// A handle to one named queue on a [`MemoryBroker`].
pub struct MemoryQueue {
    name: String,
    key: String,
    broker: MemoryBroker,
    options: MemoryQueueOptions,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    processing: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Jobs currently held by this handle's workers.
    active: Arc<DashMap<String, StoredJob>>,
    events: broadcast::Sender<QueueEvent>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new(name: &str, broker: MemoryBroker, options: MemoryQueueOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            key: queue_key(&options.prefix, name),
            broker,
            options,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown,
            processing: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            active: Arc::new(DashMap::new()),
            events,
        }
    }

    #[must_use]
    pub fn options(&self) -> &MemoryQueueOptions {
        &self.options
    }

    /// Put jobs abandoned by aborted workers back on the queue.
    fn requeue_stalled(&self) {
        let stalled: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        let state = self.broker.existing(&self.key);
        for id in stalled {
            let Some((_, job)) = self.active.remove(&id) else {
                continue;
            };
            warn!(queue = %self.name, job_id = %id, "job stalled on close; requeueing");
            let _ = self.events.send(QueueEvent::Stalled { job_id: id });
            if let Some(state) = &state {
                state.push(job);
            }
        }
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_job(&self, data: Value) -> Box<dyn JobBuilder> {
        Box::new(MemoryJobBuilder {
            broker: self.broker.clone(),
            key: self.key.clone(),
            closed: Arc::clone(&self.closed),
            data,
            settings: JobSettings::default(),
        })
    }

    fn process(&self, concurrency: usize, handler: JobHandler) -> Result<(), EngineError> {
        if !self.options.is_worker {
            return Err(EngineError::NotWorker);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        if self.processing.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyProcessing);
        }

        let consumer = Arc::new(Consumer {
            queue: self.name.clone(),
            state: self.broker.queue(&self.key),
            events: self.events.clone(),
            active: Arc::clone(&self.active),
            handler,
        });
        let mut workers = self.workers.lock();
        for _ in 0..concurrency.max(1) {
            workers.push(tokio::spawn(work(
                Arc::clone(&consumer),
                self.shutdown.subscribe(),
            )));
        }
        debug!(queue = %self.name, concurrency, "consumer started");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn ready(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        let _ = self.events.send(QueueEvent::Ready);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.send_replace(true);

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            while let Some(worker) = workers.last_mut() {
                let _ = worker.await;
                workers.pop();
            }
        };
        if tokio::time::timeout(self.options.close_timeout(), drain)
            .await
            .is_err()
        {
            for worker in &workers {
                worker.abort();
            }
            for worker in workers {
                let _ = worker.await;
            }
            self.requeue_stalled();
        }

        debug!(queue = %self.name, "queue closed");
        Ok(())
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        if let Some(state) = self.broker.remove(&self.key) {
            state.destroy();
            debug!(queue = %self.name, "queue destroyed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryJobBuilder
// ---------------------------------------------------------------------------

struct MemoryJobBuilder {
    broker: MemoryBroker,
    key: String,
    closed: Arc<AtomicBool>,
    data: Value,
    settings: JobSettings,
}

#[async_trait]
impl JobBuilder for MemoryJobBuilder {
    fn configure(&mut self, option: JobOption, args: &[Value]) -> Result<(), EngineError> {
        self.settings.configure(option, args)
    }

    async fn save(self: Box<Self>) -> Result<JobHandle, EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        let state = self.broker.queue(&self.key);
        let id = match &self.settings.id {
            Some(id) => id.clone(),
            None => state.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
        };

        // Subscribe before the job becomes visible to consumers.
        let (tx, rx) = broadcast::channel(JOB_EVENT_CAPACITY);
        state.job_events.insert(id.clone(), tx);

        let delay = self.settings.remaining_delay();
        let job = StoredJob {
            id: id.clone(),
            data: self.data,
            settings: self.settings,
            attempts: 0,
        };
        schedule(state, job, delay);
        Ok(JobHandle::new(id, rx))
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Shared context of one queue's worker tasks.
struct Consumer {
    queue: String,
    state: Arc<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    active: Arc<DashMap<String, StoredJob>>,
    handler: JobHandler,
}

/// Aborts the wrapped task when dropped, so an abandoned attempt never keeps
/// running.
struct AbortOnDrop(JoinHandle<JobOutcome>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn work(consumer: Arc<Consumer>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => return,
            job = consumer.state.pop() => match job {
                Some(job) => job,
                None => {
                    debug!(queue = %consumer.queue, "queue destroyed; worker exiting");
                    return;
                }
            },
        };
        consumer.run(job).await;
    }
}

impl Consumer {
    async fn run(&self, job: StoredJob) {
        self.active.insert(job.id.clone(), job.clone());
        let outcome = self.attempt(&job).await;
        self.active.remove(&job.id);
        self.settle(job, outcome);
    }

    async fn attempt(&self, job: &StoredJob) -> JobOutcome {
        // The handler sees the retries still left, not the original budget.
        let mut settings = job.settings.clone();
        settings.retries = settings.retries.saturating_sub(job.attempts);
        let runnable = Job::new(job.id.clone(), job.data.clone(), settings)
            .with_progress(self.progress_sink(&job.id));
        let mut task = AbortOnDrop(tokio::spawn((self.handler)(runnable)));

        let joined = match job.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => return Err(JobFailure::new(TIMED_OUT)),
            },
            None => (&mut task.0).await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                let message = format!("handler for job {} panicked", job.id);
                let _ = self.events.send(QueueEvent::Error {
                    message: message.clone(),
                });
                Err(JobFailure::new(message))
            }
            Err(_) => Err(JobFailure::new("job handler was cancelled")),
        }
    }

    fn progress_sink(&self, id: &str) -> ProgressSink {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let id = id.to_string();
        Arc::new(move |percent| {
            let _ = events.send(QueueEvent::Progress {
                job_id: id.clone(),
                percent,
            });
            state.emit_job(&id, JobEvent::Progress(percent));
        })
    }

    fn settle(&self, mut job: StoredJob, outcome: JobOutcome) {
        match outcome {
            Ok(result) => {
                let _ = self.events.send(QueueEvent::Succeeded {
                    job_id: job.id.clone(),
                    result: result.clone(),
                });
                self.state.emit_job(&job.id, JobEvent::Succeeded(result));
            }
            Err(error) if job.attempts < job.settings.retries => {
                job.attempts += 1;
                let _ = self.events.send(QueueEvent::Retrying {
                    job_id: job.id.clone(),
                    error: error.clone(),
                });
                self.state.emit_job(&job.id, JobEvent::Retrying(error));
                let delay = job.settings.backoff.delay(job.attempts);
                schedule(Arc::clone(&self.state), job, Some(delay));
            }
            Err(error) => {
                let _ = self.events.send(QueueEvent::Failed {
                    job_id: job.id.clone(),
                    error: error.clone(),
                });
                self.state.emit_job(&job.id, JobEvent::Failed(error));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    use jobwire_core::{CallOptions, HandlerFuture};
    use serde_json::json;

    use super::*;

    fn handler<F, Fut>(f: F) -> JobHandler
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Arc::new(move |job| Box::pin(f(job)) as HandlerFuture)
    }

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("options must be an object"),
        }
    }

    fn pair(worker_opts: Value) -> (Arc<dyn QueueHandle>, Arc<dyn QueueHandle>, MemoryBroker) {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new(broker.clone());
        let worker = engine.create_queue("test", &options(worker_opts)).unwrap();
        let client = engine
            .create_queue("test", &options(json!({ "isWorker": false })))
            .unwrap();
        (worker, client, broker)
    }

    fn echo() -> JobHandler {
        handler(|job: Job| async move { Ok(job.data) })
    }

    async fn submit(queue: &Arc<dyn QueueHandle>, data: Value, opts: &CallOptions) -> JobHandle {
        let mut builder = queue.create_job(data);
        opts.apply(builder.as_mut()).unwrap();
        builder.save().await.unwrap()
    }

    #[test]
    fn options_defaults_and_validation() {
        let parsed = MemoryQueueOptions::from_map(&options(json!({ "redis": "x" }))).unwrap();
        assert_eq!(parsed, MemoryQueueOptions::default());
        assert_eq!(parsed.prefix, "bq");
        assert!(parsed.is_worker);

        let err = MemoryQueueOptions::from_map(&options(json!({ "isWorker": "yes" }))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = MemoryQueueOptions::from_map(&options(json!({ "eventCapacity": 0 }))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn worker_settles_client_job() {
        let (worker, client, _) = pair(json!({}));
        worker.process(1, echo()).unwrap();

        let handle = submit(&client, json!({ "t": 1 }), &CallOptions::new()).await;
        assert_eq!(handle.id, "1");
        assert_eq!(handle.settled().await.unwrap(), Ok(json!({ "t": 1 })));

        let handle = submit(&client, json!({}), &CallOptions::new().set_id("custom")).await;
        assert_eq!(handle.id, "custom");
        handle.settled().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn process_guards() {
        let (worker, client, _) = pair(json!({}));
        assert_eq!(client.process(1, echo()), Err(EngineError::NotWorker));

        worker.process(1, echo()).unwrap();
        assert_eq!(worker.process(1, echo()), Err(EngineError::AlreadyProcessing));
    }

    #[tokio::test]
    async fn retries_with_backoff_then_fails() {
        let (worker, client, _) = pair(json!({}));
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let failing = handler(move |_job: Job| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err(JobFailure::new("nope")) }
        });
        worker.process(1, failing).unwrap();
        let mut events = worker.subscribe();

        let opts = CallOptions::new().retries(2).backoff("fixed", 10);
        let start = Instant::now();
        let outcome = submit(&client, json!({}), &opts).await.settled().await.unwrap();

        assert_eq!(outcome, Err(JobFailure::new("nope")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(20));

        let mut retrying = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, QueueEvent::Retrying { .. }) {
                retrying += 1;
            }
        }
        assert_eq!(retrying, 2);
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let (worker, client, _) = pair(json!({}));
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let flaky = handler(move |_job: Job| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(JobFailure::new("first"))
                } else {
                    Ok(json!("done"))
                }
            }
        });
        worker.process(1, flaky).unwrap();

        let outcome = submit(&client, json!({}), &CallOptions::new().retries(1))
            .await
            .settled()
            .await
            .unwrap();
        assert_eq!(outcome, Ok(json!("done")));
    }

    #[tokio::test]
    async fn handler_sees_remaining_retries() {
        let (worker, client, _) = pair(json!({}));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let failing = handler(move |job: Job| {
            record.lock().push(job.settings.retries);
            async { Err(JobFailure::new("nope")) }
        });
        worker.process(1, failing).unwrap();

        let outcome = submit(&client, json!({}), &CallOptions::new().retries(2))
            .await
            .settled()
            .await
            .unwrap();
        assert_eq!(outcome, Err(JobFailure::new("nope")));
        assert_eq!(*seen.lock(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn timeout_fails_the_attempt() {
        let (worker, client, _) = pair(json!({}));
        let slow = handler(|_job: Job| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        });
        worker.process(1, slow).unwrap();

        let opts = CallOptions::new().timeout(20);
        let outcome = submit(&client, json!({}), &opts).await.settled().await.unwrap();
        assert_eq!(outcome, Err(JobFailure::new(TIMED_OUT)));
    }

    #[tokio::test]
    async fn panicking_handler_fails_the_job() {
        let (worker, client, _) = pair(json!({}));
        let panicking = handler(|_job: Job| async { panic!("bad handler") });
        worker.process(1, panicking).unwrap();
        let mut events = worker.subscribe();

        let outcome = submit(&client, json!({}), &CallOptions::new())
            .await
            .settled()
            .await
            .unwrap();
        assert_eq!(outcome, Err(JobFailure::new("handler for job 1 panicked")));
        assert!(matches!(events.recv().await.unwrap(), QueueEvent::Error { .. }));
    }

    #[tokio::test]
    async fn delayed_job_waits() {
        let (worker, client, broker) = pair(json!({}));
        let epoch_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        let start = Instant::now();
        let handle = submit(&client, json!({}), &CallOptions::new().delay_until(epoch_ms + 60)).await;
        assert_eq!(broker.waiting("bq", "test"), 0);

        worker.process(1, echo()).unwrap();
        handle.settled().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn progress_reaches_job_and_queue() {
        let (worker, client, _) = pair(json!({}));
        let reporting = handler(|job: Job| async move {
            job.report_progress(50);
            Ok(json!(null))
        });
        let mut events = worker.subscribe();
        worker.process(1, reporting).unwrap();

        submit(&client, json!({}), &CallOptions::new())
            .await
            .settled()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::Progress {
                job_id: "1".into(),
                percent: 50
            }
        );
    }

    #[tokio::test]
    async fn save_after_close_is_rejected() {
        let (_, client, _) = pair(json!({}));
        client.close().await.unwrap();
        client.close().await.unwrap();

        let err = client.create_job(json!({})).save().await.unwrap_err();
        assert_eq!(err, EngineError::Closed);
        assert_eq!(client.ready().await, Err(EngineError::Closed));
    }

    #[tokio::test]
    async fn destroy_erases_state_and_is_idempotent() {
        let (worker, client, broker) = pair(json!({}));
        let handle = submit(&client, json!({}), &CallOptions::new()).await;
        assert_eq!(broker.waiting("bq", "test"), 1);

        worker.destroy().await.unwrap();
        worker.destroy().await.unwrap();

        assert!(!broker.has_queue("bq", "test"));
        assert_eq!(handle.settled().await, Err(EngineError::Closed));
    }

    #[tokio::test]
    async fn forced_close_requeues_in_flight_jobs() {
        let broker = MemoryBroker::new();
        let engine = MemoryEngine::new(broker.clone());
        let stuck = engine
            .create_queue("test", &options(json!({ "closeTimeoutMs": 30 })))
            .unwrap();
        let client = engine
            .create_queue("test", &options(json!({ "isWorker": false })))
            .unwrap();

        let started = Arc::new(Notify::new());
        let signal = Arc::clone(&started);
        let hang = handler(move |_job: Job| {
            signal.notify_one();
            std::future::pending::<JobOutcome>()
        });
        stuck.process(1, hang).unwrap();
        let mut events = stuck.subscribe();

        let handle = submit(&client, json!({ "t": 7 }), &CallOptions::new()).await;
        started.notified().await;
        stuck.close().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::Stalled { job_id: "1".into() }
        );
        assert_eq!(broker.waiting("bq", "test"), 1);

        let fresh = engine.create_queue("test", &Map::new()).unwrap();
        fresh.process(1, echo()).unwrap();
        assert_eq!(handle.settled().await.unwrap(), Ok(json!({ "t": 7 })));
    }
}
