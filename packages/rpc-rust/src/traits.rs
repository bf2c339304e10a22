use crate::service::capabilities::MethodSet;

/// A remotely callable service.
///
/// Implementors register their methods explicitly; nothing is looked up by
/// reflection at call time.
///
/// ```
/// use std::sync::Arc;
///
/// use jobwire::{MethodResult, MethodSet, RpcService};
/// use jobwire_core::Job;
///
/// struct Greeter;
///
/// impl Greeter {
///     async fn hello(self: Arc<Self>, job: Job) -> MethodResult {
///         Ok(serde_json::json!({ "hello": job.data["name"] }))
///     }
/// }
///
/// impl RpcService for Greeter {
///     fn methods(set: MethodSet<Self>) -> MethodSet<Self> {
///         set.method("hello", Self::hello)
///     }
/// }
/// ```
pub trait RpcService: Send + Sync + Sized + 'static {
    /// Self-reported queue name. When `None`, the name is derived from the
    /// type's identifier (`UserAccounts` becomes `user-accounts`).
    fn name(&self) -> Option<&str> {
        None
    }

    /// Register every remotely callable method.
    fn methods(set: MethodSet<Self>) -> MethodSet<Self>;
}
