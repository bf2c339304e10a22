//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`instrument`]: Per-job `tracing` span with duration and outcome
//! - [`pipeline`]: Composes the layers over a service's router

pub mod instrument;
pub mod pipeline;

pub use instrument::InstrumentLayer;
pub use pipeline::{build_dispatch_pipeline, job_handler};
