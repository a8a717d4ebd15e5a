//! Deduplication, priority back-off, input resolution, container dispatch, and result
//! submission for a single `RequestStarted` event.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            request-handler                               │
//! │                                                                          │
//! │  containers      — container filter: inline callback + config map       │
//! │  backoff         — deterministic priority wait                          │
//! │  payload         — ABI bridge to agent_core's payload envelope port      │
//! │  handler         — RequestHandler: the 12-step handle() sequence         │
//! │  retry_loop      — optional Handler-level retry timer                    │
//! │  health_loop     — container registry health-check timer                 │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod backoff;
pub mod containers;
pub mod error;
pub mod handler;
pub mod health_loop;
pub mod payload;
pub mod retry_loop;
pub mod scheduler_handle;

pub use backoff::{priority_delay, MAX_DELAY_MULTI_REDUNDANCY, MAX_DELAY_SINGLE_REDUNDANCY};
pub use containers::{ContainerSource, InlineLookup};
pub use error::{HandlerError, Result};
pub use handler::{HandlerConfig, IsProcessed, RequestHandler};
pub use health_loop::HealthCheckLoop;
pub use retry_loop::{RetryEventSource, RetryLoop};
pub use scheduler_handle::SchedulerHandle;
