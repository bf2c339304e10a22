//! Capability sets: the methods a service exposes, keyed by name.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use jobwire_core::{naming, Job, RpcError};
use serde_json::Value;

use crate::traits::RpcService;

/// Methods whose name starts with this prefix are never callable remotely.
pub const PRIVATE_PREFIX: char = '_';

/// What a service method returns. The error's display string becomes the
/// job's failure message.
pub type MethodResult = anyhow::Result<Value>;

type MethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send>>;

/// A type-erased asynchronous method.
pub type MethodHandler = Arc<dyn Fn(Job) -> MethodFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// MethodSet
// ---------------------------------------------------------------------------

/// Registration builder handed to [`RpcService::methods`].
pub struct MethodSet<S> {
    service: Arc<S>,
    methods: HashMap<String, MethodHandler>,
}

impl<S: Send + Sync + 'static> MethodSet<S> {
    #[must_use]
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            methods: HashMap::new(),
        }
    }

    /// Register a method that receives the service instance.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<S>, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let handler: MethodHandler =
            Arc::new(move |job| Box::pin(f(Arc::clone(&service), job)) as MethodFuture);
        self.methods.insert(name.into(), handler);
        self
    }

    /// Register a method that does not need the service instance.
    #[must_use]
    pub fn function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |job| Box::pin(f(job)) as MethodFuture);
        self.methods.insert(name.into(), handler);
        self
    }

    #[must_use]
    pub fn into_capabilities(self) -> Capabilities {
        Capabilities {
            methods: self.methods,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Immutable method table of a bound service.
#[derive(Clone, Default)]
pub struct Capabilities {
    methods: HashMap<String, MethodHandler>,
}

impl Capabilities {
    /// Registered method names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Resolve `method` to its handler. This is the only routing gate.
    ///
    /// # Errors
    ///
    /// `UnknownMethod` for private names and names not in the table.
    pub fn authorize(&self, method: &str) -> Result<&MethodHandler, RpcError> {
        if method.starts_with(PRIVATE_PREFIX) {
            return Err(RpcError::UnknownMethod(method.to_string()));
        }
        self.methods
            .get(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("methods", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// A service ready to be bound: normalized queue name plus capabilities.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    name: String,
    capabilities: Arc<Capabilities>,
}

impl ServiceDefinition {
    /// Define a service from an explicit name and method table.
    #[must_use]
    pub fn new(name: &str, capabilities: Capabilities) -> Self {
        Self {
            name: naming::service_name(Some(name), name),
            capabilities: Arc::new(capabilities),
        }
    }

    /// Define a service from an [`RpcService`] implementation.
    #[must_use]
    pub fn from_service<S: RpcService>(service: S) -> Self {
        let reported = service.name().map(str::to_owned);
        let name = naming::service_name(reported.as_deref(), naming::type_identifier::<S>());
        let capabilities = S::methods(MethodSet::new(Arc::new(service))).into_capabilities();
        Self {
            name,
            capabilities: Arc::new(capabilities),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capabilities(&self) -> &Arc<Capabilities> {
        &self.capabilities
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use jobwire_core::JobSettings;
    use serde_json::json;

    use super::*;

    struct UserAccounts {
        calls: AtomicU32,
    }

    impl UserAccounts {
        async fn count(self: Arc<Self>, _job: Job) -> MethodResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!(n))
        }
    }

    impl RpcService for UserAccounts {
        fn methods(set: MethodSet<Self>) -> MethodSet<Self> {
            set.method("count", Self::count)
                .method("_internal", Self::count)
                .function("echo", |job: Job| async move { Ok(job.data) })
        }
    }

    struct Named;

    impl RpcService for Named {
        fn name(&self) -> Option<&str> {
            Some("test")
        }

        fn methods(set: MethodSet<Self>) -> MethodSet<Self> {
            set
        }
    }

    fn job(data: serde_json::Value) -> Job {
        Job::new("1", data, JobSettings::default())
    }

    #[test]
    fn derives_name_from_type() {
        let def = ServiceDefinition::from_service(UserAccounts {
            calls: AtomicU32::new(0),
        });
        assert_eq!(def.name(), "user-accounts");
        assert_eq!(def.capabilities().names(), vec!["_internal", "count", "echo"]);
    }

    #[test]
    fn self_reported_name_wins() {
        let def = ServiceDefinition::from_service(Named);
        assert_eq!(def.name(), "test");
        assert!(def.capabilities().is_empty());
    }

    #[test]
    fn explicit_definition_is_normalized() {
        let def = ServiceDefinition::new("mailQueue", Capabilities::default());
        assert_eq!(def.name(), "mail-queue");
    }

    #[tokio::test]
    async fn authorize_resolves_public_methods() {
        let def = ServiceDefinition::from_service(UserAccounts {
            calls: AtomicU32::new(0),
        });
        let caps = def.capabilities();

        let count = caps.authorize("count").unwrap();
        assert_eq!(count(job(json!({}))).await.unwrap(), json!(1));
        assert_eq!(count(job(json!({}))).await.unwrap(), json!(2));

        let echo = caps.authorize("echo").unwrap();
        assert_eq!(echo(job(json!({ "t": 1 }))).await.unwrap(), json!({ "t": 1 }));
    }

    #[test]
    fn authorize_rejects_private_and_missing() {
        let def = ServiceDefinition::from_service(UserAccounts {
            calls: AtomicU32::new(0),
        });
        let caps = def.capabilities();

        assert!(matches!(
            caps.authorize("_internal"),
            Err(RpcError::UnknownMethod(m)) if m == "_internal"
        ));
        assert!(matches!(
            caps.authorize("missing"),
            Err(RpcError::UnknownMethod(m)) if m == "missing"
        ));
    }
}
