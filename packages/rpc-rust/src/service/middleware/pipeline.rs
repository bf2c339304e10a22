//! Pipeline composition: wraps a service's router into the job handler the
//! queue engine calls.

use std::sync::Arc;

use jobwire_core::{HandlerFuture, Job, JobFailure, JobHandler};
use serde_json::Value;
use tower::{Service, ServiceBuilder, ServiceExt};

use super::instrument::InstrumentLayer;
use crate::service::capabilities::Capabilities;
use crate::service::router::{DispatchError, DispatchFuture, MethodRouter};

/// Build the dispatch pipeline for one service.
///
/// Layer order (outermost to innermost):
/// 1. `InstrumentLayer` -- span per job with duration and outcome
/// 2. `MethodRouter` -- decode, authorize, invoke
#[must_use]
pub fn build_dispatch_pipeline(
    service: &str,
    capabilities: Arc<Capabilities>,
) -> impl Service<Job, Response = Value, Error = DispatchError, Future = DispatchFuture>
       + Clone
       + Send
       + Sync
       + 'static {
    ServiceBuilder::new()
        .layer(InstrumentLayer::new(service))
        .service(MethodRouter::new(capabilities))
}

/// Adapt the dispatch pipeline to the engine's handler signature.
///
/// Rejections and method errors both become the job's failure, which the
/// engine may retry.
#[must_use]
pub fn job_handler(service: &str, capabilities: Arc<Capabilities>) -> JobHandler {
    let pipeline = build_dispatch_pipeline(service, capabilities);
    Arc::new(move |job: Job| {
        let svc = pipeline.clone();
        Box::pin(async move { svc.oneshot(job).await.map_err(JobFailure::from) }) as HandlerFuture
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
