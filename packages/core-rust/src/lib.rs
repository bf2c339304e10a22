//! `jobwire` core: RPC envelope, job options, service naming, and the queue engine contract.

pub mod envelope;
pub mod error;
pub mod job;
pub mod naming;
pub mod options;
pub mod traits;

pub use envelope::{Envelope, METHOD_KEY};
pub use error::{EngineError, JobFailure, RpcError};
pub use job::{Backoff, Job, JobOutcome, JobSettings, ProgressSink};
pub use options::{CallOptions, JobOption};
pub use traits::{
    HandlerFuture, JobBuilder, JobEvent, JobHandle, JobHandler, QueueEngine, QueueEvent,
    QueueHandle,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
