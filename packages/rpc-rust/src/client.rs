//! Caller side: forwards method invocations to service queues as jobs.

use std::sync::Arc;

use jobwire_core::{envelope, CallOptions, JobHandle, QueueEngine, RpcError};
use serde_json::Value;
use tracing::debug;

use crate::config::RpcConfig;
use crate::service::registry::{BindingState, QueueRegistry};

/// Engine option that keeps client queues from ever consuming.
const IS_WORKER: &str = "isWorker";

/// Enqueues method invocations and awaits their results.
///
/// Binding requires `&mut self`; calls take `&self`, so any number of them
/// may be in flight at once.
#[derive(Debug)]
pub struct Client {
    registry: QueueRegistry,
    config: RpcConfig,
}

impl Client {
    /// Create a client. Whatever the configuration says, its queues are
    /// created with `isWorker = false`.
    #[must_use]
    pub fn new(engine: Arc<dyn QueueEngine>, mut config: RpcConfig) -> Self {
        config
            .engine_options
            .insert(IS_WORKER.to_string(), Value::Bool(false));
        Self {
            registry: QueueRegistry::new(engine),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Bind a queue for `name`. `options` default to the configured engine
    /// options; a second bind for the same name is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidServiceName`, `InvalidOptions`, or the engine's error.
    pub fn bind_service(&mut self, name: &str, options: Option<Value>) -> Result<(), RpcError> {
        let options = options.unwrap_or_else(|| Value::Object(self.config.engine_options.clone()));
        if self.registry.bind(name, &options)? {
            debug!(service = name, "client queue bound");
        }
        Ok(())
    }

    /// Bind several services with the same options.
    ///
    /// # Errors
    ///
    /// Stops at the first name that fails to bind.
    pub fn bind_services<I, N>(&mut self, names: I, options: Option<Value>) -> Result<(), RpcError>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        for name in names {
            self.bind_service(name.as_ref(), options.clone())?;
        }
        Ok(())
    }

    /// Enqueue `method` on `service` and return as soon as the job is saved.
    ///
    /// `options` default to the configured `defaultCallOptions`. Only the
    /// recognized job options are applied; other keys are ignored.
    ///
    /// # Errors
    ///
    /// `InvalidServiceName`, `InvalidMethodName`, or `InvalidArguments` for
    /// bad inputs, `UnknownService` if `service` was never bound, or the
    /// engine's error if the job cannot be configured or saved.
    pub async fn forward(
        &self,
        service: &str,
        method: &str,
        data: Value,
        options: Option<&CallOptions>,
    ) -> Result<JobHandle, RpcError> {
        if service.is_empty() {
            return Err(RpcError::InvalidServiceName(service.to_string()));
        }
        if method.is_empty() {
            return Err(RpcError::InvalidMethodName(method.to_string()));
        }
        if !data.is_object() {
            return Err(RpcError::InvalidArguments);
        }

        let binding = self
            .registry
            .get(service)
            .ok_or_else(|| RpcError::UnknownService(service.to_string()))?;
        let payload = envelope::encode(method, data)?;
        let options = options.unwrap_or(&self.config.default_call_options);

        let mut job = binding.queue().create_job(payload);
        options.apply(job.as_mut())?;
        let handle = job.save().await?;
        debug!(service, method, job_id = %handle.id, "job forwarded");
        Ok(handle)
    }

    /// Invoke `method` on `service` and wait for its result.
    ///
    /// # Errors
    ///
    /// Everything [`forward`](Self::forward) returns, plus `JobFailed` with
    /// the engine's failure verbatim when the job does not succeed.
    pub async fn send(
        &self,
        service: &str,
        method: &str,
        data: Value,
        options: Option<&CallOptions>,
    ) -> Result<Value, RpcError> {
        let handle = self.forward(service, method, data, options).await?;
        match handle.settled().await? {
            Ok(result) => Ok(result),
            Err(failure) => Err(RpcError::JobFailed(failure)),
        }
    }

    /// Close every bound queue.
    ///
    /// # Errors
    ///
    /// The first close failure; the others are logged.
    pub async fn close(&self) -> Result<(), RpcError> {
        self.registry.close_all().await
    }

    #[must_use]
    pub fn state(&self, service: &str) -> Option<BindingState> {
        self.registry.state(service)
    }

    /// Bound service names, in bind order.
    #[must_use]
    pub fn service_names(&self) -> &[String] {
        self.registry.names()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
