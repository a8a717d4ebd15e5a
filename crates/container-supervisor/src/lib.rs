//! Container lifecycle and invocation for the agent's declared compute containers.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         container-supervisor                             │
//! │                                                                          │
//! │  pool    — ContainerSupervisor: prepare()/cleanup()/stop_persistent()    │
//! │  invoke  — HTTP call against a prepared container, retry + timeout       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Containers are addressed by the agent's own declared container id, not the Docker container
//! name (`"noosphere-<id>"`) — callers never need to know the naming scheme.

pub mod error;
pub mod invoke;
pub mod pool;

pub use error::{Result, SupervisorError};
pub use invoke::{
    ContainerRuntime, InvocationResult, DEFAULT_CONNECT_RETRIES, DEFAULT_INVOKE_TIMEOUT, DEFAULT_RETRY_DELAY,
};
pub use pool::{ContainerHandle, ContainerSupervisor, NetworkMode};
