//! Error taxonomy shared by clients, servers, and queue engines.

use serde::{Deserialize, Serialize};

/// The failure a queue engine attaches to a job that did not succeed.
///
/// Carried verbatim from the consumer to whoever awaits the job's settlement.
/// Remote method errors are never reclassified into [`RpcError`] variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
}

impl JobFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors raised by a queue engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("queue is closed")]
    Closed,
    #[error("queue is not configured as a worker")]
    NotWorker,
    #[error("queue is already processing jobs")]
    AlreadyProcessing,
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid value for job option {option}: {reason}")]
    InvalidJobOption {
        option: &'static str,
        reason: String,
    },
    #[error("broker error: {0}")]
    Broker(String),
}

/// Errors returned by the RPC layer.
///
/// Validation variants are raised at the call site that detects the
/// violation; nothing is deferred into the queue engine.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("invalid arguments: expected a JSON object")]
    InvalidArguments,
    #[error("invalid method name: {0:?}")]
    InvalidMethodName(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("job failed: {0}")]
    JobFailed(JobFailure),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RpcError {
    /// Converts a routing rejection into the failure handed back to the engine.
    #[must_use]
    pub fn into_failure(self) -> JobFailure {
        match self {
            Self::JobFailed(failure) => failure,
            other => JobFailure::new(other.to_string()),
        }
    }
}
