//! `jobwire`: RPC over a durable job queue. Clients enqueue method calls as
//! jobs, servers consume them and route each to a service method.

pub mod client;
pub mod config;
pub mod engine;
pub mod logging;
pub mod server;
pub mod service;
pub mod traits;

pub use client::Client;
pub use config::{LogFormat, LoggerOptions, RpcConfig};
pub use engine::{MemoryBroker, MemoryEngine, MemoryQueueOptions};
pub use server::Server;
pub use service::{BindingState, MethodResult, MethodSet, ServiceDefinition};
pub use traits::RpcService;
