//! Service hosting and method dispatch.
//!
//! 1. **Capabilities** (`capabilities`): a service's method table and name
//! 2. **Routing** (`router`): decode + authorize + invoke, as a tower `Service`
//! 3. **Middleware** (`middleware`): tracing span per job, pipeline assembly
//! 4. **Registry** (`registry`): one queue per service name, lifecycle state
//! 5. **Taps** (`taps`): one log line per queue event

pub mod capabilities;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod taps;

pub use capabilities::{Capabilities, MethodHandler, MethodResult, MethodSet, ServiceDefinition};
pub use registry::{Binding, BindingState, QueueRegistry};
pub use router::{DispatchError, MethodRouter};
