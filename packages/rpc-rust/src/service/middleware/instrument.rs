//! Instrumentation middleware for method dispatch.
//!
//! Wraps every job in a `tracing` span carrying the service, job id, and
//! method, and records duration and outcome when the method settles.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use jobwire_core::{envelope, Job};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{debug_span, Instrument};

use crate::service::router::{DispatchError, DispatchFuture};

// ---------------------------------------------------------------------------
// InstrumentLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatch with `tracing` spans.
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    service: Arc<str>,
}

impl InstrumentLayer {
    #[must_use]
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            service: Arc::clone(&self.service),
        }
    }
}

// ---------------------------------------------------------------------------
// InstrumentService
// ---------------------------------------------------------------------------

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    service: Arc<str>,
}

impl<S> Service<Job> for InstrumentService<S>
where
    S: Service<Job, Response = Value, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, job: Job) -> Self::Future {
        let method = envelope::decode(&job.data).unwrap_or("<malformed>");
        let span = debug_span!(
            "dispatch",
            service = %self.service,
            job_id = %job.id,
            method = %method,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(job);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(DispatchError::Rejected(_)) => "rejected",
                    Err(DispatchError::Method(_)) => "error",
                };

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                tracing::debug!(duration_ms, outcome, "dispatch complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use jobwire_core::{JobSettings, RpcError};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    /// Echoes the payload, or rejects when asked to.
    struct EchoService;

    impl Service<Job> for EchoService {
        type Response = Value;
        type Error = DispatchError;
        type Future = DispatchFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, job: Job) -> Self::Future {
            Box::pin(async move {
                if job.data["reject"] == json!(true) {
                    Err(DispatchError::Rejected(RpcError::UnknownMethod("x".into())))
                } else {
                    Ok(job.data)
                }
            })
        }
    }

    #[tokio::test]
    async fn passes_response_through() {
        let svc = InstrumentLayer::new("test").layer(EchoService);
        let job = Job::new("1", json!({ "_": "echo", "t": 42 }), JobSettings::default());
        let resp = svc.oneshot(job).await.unwrap();
        assert_eq!(resp["t"], 42);
    }

    #[tokio::test]
    async fn passes_error_through() {
        let svc = InstrumentLayer::new("test").layer(EchoService);
        let job = Job::new("2", json!({ "reject": true }), JobSettings::default());
        let err = svc.oneshot(job).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }
}
