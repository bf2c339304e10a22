//! Service side: binds services to queues and consumes their jobs.

use std::sync::Arc;

use jobwire_core::{QueueEngine, QueueHandle, RpcError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::service::capabilities::ServiceDefinition;
use crate::service::middleware::job_handler;
use crate::service::registry::{BindingState, QueueRegistry};
use crate::service::taps;
use crate::traits::RpcService;

/// Hosts services: one queue and one consumer per service name.
pub struct Server {
    registry: QueueRegistry,
    config: RpcConfig,
    level: LevelFilter,
    tap_shutdown: watch::Sender<bool>,
    taps: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Create a server.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` if the configured log level is not recognized.
    pub fn new(engine: Arc<dyn QueueEngine>, config: RpcConfig) -> Result<Self, RpcError> {
        let level = config.logger_options.level_filter()?;
        let (tap_shutdown, _) = watch::channel(false);
        Ok(Self {
            registry: QueueRegistry::new(engine),
            config,
            level,
            tap_shutdown,
            taps: Mutex::new(Vec::new()),
        })
    }

    /// Level that gates the diagnostic taps.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        self.level
    }

    #[must_use]
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Bind `service` and start consuming its queue.
    ///
    /// # Errors
    ///
    /// See [`bind_definition`](Self::bind_definition).
    pub async fn bind_service<S: RpcService>(
        &mut self,
        service: S,
        concurrency: usize,
        options: Option<Value>,
    ) -> Result<(), RpcError> {
        self.bind_definition(ServiceDefinition::from_service(service), concurrency, options)
            .await
    }

    /// Bind several services with the same concurrency and options.
    ///
    /// # Errors
    ///
    /// Stops at the first service that fails to bind.
    pub async fn bind_services<I>(
        &mut self,
        services: I,
        concurrency: usize,
        options: Option<Value>,
    ) -> Result<(), RpcError>
    where
        I: IntoIterator<Item = ServiceDefinition>,
    {
        for definition in services {
            self.bind_definition(definition, concurrency, options.clone())
                .await?;
        }
        Ok(())
    }

    /// Bind a service definition: create its queue, wait for the broker,
    /// start a consumer running `concurrency` jobs at a time, and install
    /// the diagnostic taps.
    ///
    /// A name that is already bound is left untouched. If the queue never
    /// starts consuming it is closed and the name is released.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` for a zero concurrency or non-object options,
    /// `InvalidServiceName` for an empty name, or the engine's error.
    pub async fn bind_definition(
        &mut self,
        definition: ServiceDefinition,
        concurrency: usize,
        options: Option<Value>,
    ) -> Result<(), RpcError> {
        if concurrency == 0 {
            return Err(RpcError::InvalidOptions(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let options = options.unwrap_or_else(|| Value::Object(self.config.engine_options.clone()));
        let name = definition.name();
        if !self.registry.bind(name, &options)? {
            debug!(service = name, "service already bound");
            return Ok(());
        }

        let queue = self
            .registry
            .get(name)
            .map(|binding| Arc::clone(binding.queue()))
            .ok_or_else(|| RpcError::UnknownService(name.to_string()))?;
        if let Err(err) = self.start(&definition, &queue, concurrency).await {
            if let Err(close_err) = queue.close().await {
                warn!(service = name, error = %close_err, "closing a failed binding");
            }
            self.registry.unbind(name);
            return Err(err);
        }
        debug!(
            service = name,
            concurrency,
            methods = ?definition.capabilities().names(),
            "service consuming"
        );
        Ok(())
    }

    /// Await the queue, start its consumer, then attach the taps. Events
    /// raised in between stay buffered in the subscription.
    async fn start(
        &self,
        definition: &ServiceDefinition,
        queue: &Arc<dyn QueueHandle>,
        concurrency: usize,
    ) -> Result<(), RpcError> {
        let name = definition.name();
        let events = queue.subscribe();

        queue.ready().await?;
        self.set_state(name, BindingState::Ready);
        if self.level >= LevelFilter::INFO {
            info!(target: "jobwire::tap", "{name}|ready");
        }

        queue.process(
            concurrency,
            job_handler(name, Arc::clone(definition.capabilities())),
        )?;
        self.set_state(name, BindingState::Consuming);

        if taps::taps_enabled(self.level) {
            let tap = taps::spawn(
                name.to_string(),
                events,
                self.level,
                self.tap_shutdown.subscribe(),
            );
            self.taps.lock().push(tap);
        }
        Ok(())
    }

    fn set_state(&self, name: &str, state: BindingState) {
        if let Some(binding) = self.registry.get(name) {
            binding.set_state(state);
        }
    }

    /// Stop every consumer and close every queue, then stop the taps.
    ///
    /// # Errors
    ///
    /// The first close failure; the others are logged.
    pub async fn close(&self) -> Result<(), RpcError> {
        let closed = self.registry.close_all().await;
        self.stop_taps().await;
        closed
    }

    /// Erase everything the broker holds for every bound queue, then stop
    /// the taps.
    ///
    /// # Errors
    ///
    /// The first destroy failure; the others are logged.
    pub async fn destroy(&self) -> Result<(), RpcError> {
        let destroyed = self.registry.destroy_all().await;
        self.stop_taps().await;
        destroyed
    }

    /// Signal every tap and wait for it to drain. Later calls find nothing
    /// left to await.
    async fn stop_taps(&self) {
        self.tap_shutdown.send_replace(true);
        let taps = std::mem::take(&mut *self.taps.lock());
        for tap in taps {
            let _ = tap.await;
        }
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

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("registry", &self.registry)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
