//! Method routing: dispatches a `Job` to a capability by the method named in
//! its envelope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use jobwire_core::{envelope, Job, JobFailure, RpcError};
use serde_json::Value;
use tower::Service;

use super::capabilities::Capabilities;

/// Future returned by every dispatch service in the pipeline.
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;

/// Why a job did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The job never reached a method (malformed payload, unknown method).
    #[error(transparent)]
    Rejected(#[from] RpcError),
    /// The method ran and failed.
    #[error("{0}")]
    Method(anyhow::Error),
}

impl From<DispatchError> for JobFailure {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Rejected(rejection) => rejection.into_failure(),
            DispatchError::Method(err) => JobFailure::from(err),
        }
    }
}

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes jobs of one service to its methods.
///
/// Every job is decoded and authorized before anything runs; a job that fails
/// either step never touches a method body.
#[derive(Debug, Clone)]
pub struct MethodRouter {
    capabilities: Arc<Capabilities>,
}

impl MethodRouter {
    #[must_use]
    pub fn new(capabilities: Arc<Capabilities>) -> Self {
        Self { capabilities }
    }
}

impl Service<Job> for MethodRouter {
    type Response = Value;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, job: Job) -> Self::Future {
        let resolved = envelope::decode(&job.data)
            .and_then(|method| self.capabilities.authorize(method))
            .cloned();
        match resolved {
            Ok(handler) => Box::pin(async move { handler(job).await.map_err(DispatchError::Method) }),
            Err(rejection) => Box::pin(async move { Err(DispatchError::Rejected(rejection)) }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
