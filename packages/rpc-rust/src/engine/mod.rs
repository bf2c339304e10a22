//! Queue engine implementations shipped with the crate.

pub mod memory;

pub use memory::{MemoryBroker, MemoryEngine, MemoryQueue, MemoryQueueOptions};
