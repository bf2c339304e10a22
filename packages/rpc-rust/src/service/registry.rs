use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use jobwire_core::{EngineError, QueueEngine, QueueHandle, RpcError};
use serde_json::Value;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// BindingState
// ---------------------------------------------------------------------------

/// Lifecycle of one bound queue.
///
/// State machine: Bound -> Ready -> Consuming, and any state -> Closed ->
/// Destroyed. Client bindings stay `Bound` until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Queue handle created; broker connection not yet confirmed.
    Bound,
    /// The engine's ready future resolved.
    Ready,
    /// A consumer is pulling jobs.
    Consuming,
    /// The queue was closed.
    Closed,
    /// The queue's broker state was erased.
    Destroyed,
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// A queue handle plus its lifecycle state.
pub struct Binding {
    queue: Arc<dyn QueueHandle>,
    state: ArcSwap<BindingState>,
}

impl Binding {
    fn new(queue: Arc<dyn QueueHandle>) -> Self {
        Self {
            queue,
            state: ArcSwap::from_pointee(BindingState::Bound),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn QueueHandle> {
        &self.queue
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        **self.state.load()
    }

    pub fn set_state(&self, state: BindingState) {
        self.state.store(Arc::new(state));
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("queue", &self.queue.name())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QueueRegistry
// ---------------------------------------------------------------------------

/// One queue per service name, created on first bind.
///
/// A second bind for a name is a no-op: the first binding's options win.
/// Teardown walks queues in bind order.
pub struct QueueRegistry {
    engine: Arc<dyn QueueEngine>,
    bindings: HashMap<String, Binding>,
    /// Bind order for deterministic close/destroy sequencing.
    order: Vec<String>,
}

impl QueueRegistry {
    #[must_use]
    pub fn new(engine: Arc<dyn QueueEngine>) -> Self {
        Self {
            engine,
            bindings: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Bind `name` to a new queue created with `options`.
    ///
    /// Returns `true` if a queue was created, `false` if `name` was already
    /// bound (in which case `options` are discarded).
    ///
    /// # Errors
    ///
    /// `InvalidServiceName` for an empty name, `InvalidOptions` if `options`
    /// is not a JSON object, or the engine's error if queue creation fails.
    pub fn bind(&mut self, name: &str, options: &Value) -> Result<bool, RpcError> {
        if name.is_empty() {
            return Err(RpcError::InvalidServiceName(name.to_string()));
        }
        let Value::Object(options) = options else {
            return Err(RpcError::InvalidOptions(format!(
                "queue options for {name} must be an object"
            )));
        };
        if self.bindings.contains_key(name) {
            debug!(service = name, "queue already bound");
            return Ok(false);
        }

        let queue = self.engine.create_queue(name, options)?;
        self.bindings.insert(name.to_string(), Binding::new(queue));
        self.order.push(name.to_string());
        debug!(service = name, "queue bound");
        Ok(true)
    }

    /// Forget `name` so a later bind starts from scratch. The queue itself
    /// is left as is; the caller owns its teardown.
    pub fn unbind(&mut self, name: &str) -> Option<Binding> {
        let binding = self.bindings.remove(name)?;
        self.order.retain(|bound| bound != name);
        debug!(service = name, "queue unbound");
        Some(binding)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<BindingState> {
        self.bindings.get(name).map(Binding::state)
    }

    /// Bound service names, in bind order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Close every queue in bind order.
    ///
    /// Keeps going after a failure; every failure is logged.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered.
    pub async fn close_all(&self) -> Result<(), RpcError> {
        let mut first = None;
        for binding in self.in_order() {
            match binding.queue.close().await {
                Ok(()) => {
                    if binding.state() != BindingState::Destroyed {
                        binding.set_state(BindingState::Closed);
                    }
                }
                Err(err) => record_failure(&mut first, binding, "close", err),
            }
        }
        first.map_or(Ok(()), |err| Err(RpcError::Engine(err)))
    }

    /// Erase every queue's broker state in bind order.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered; the rest are only logged.
    pub async fn destroy_all(&self) -> Result<(), RpcError> {
        let mut first = None;
        for binding in self.in_order() {
            match binding.queue.destroy().await {
                Ok(()) => binding.set_state(BindingState::Destroyed),
                Err(err) => record_failure(&mut first, binding, "destroy", err),
            }
        }
        first.map_or(Ok(()), |err| Err(RpcError::Engine(err)))
    }

    fn in_order(&self) -> impl Iterator<Item = &Binding> {
        self.order.iter().filter_map(|name| self.bindings.get(name))
    }
}

fn record_failure(
    first: &mut Option<EngineError>,
    binding: &Binding,
    action: &str,
    err: EngineError,
) {
    warn!(service = binding.queue.name(), action, error = %err, "queue teardown failed");
    first.get_or_insert(err);
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("services", &self.order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
