//! Chain subscription pipeline: WS-with-HTTP-fallback connection management, checkpoint-driven
//! historical replay, and live delivery of `RequestStarted` events to a subscriber.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                             event-pipeline                               │
//! │                                                                          │
//! │  state_machine — pure ConnectionState transitions (INIT/WS/HTTP)         │
//! │  source        — LogSource (alloy-backed + scriptable mock)              │
//! │  replay        — chunked historical backfill                             │
//! │  pipeline      — EventPipeline: wires the above into start()/stop()      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod pipeline;
pub mod replay;
pub mod source;
pub mod state_machine;

pub use error::{PipelineError, Result};
pub use pipeline::{EventPipeline, EventSubscriber};
pub use replay::{replay, REPLAY_CHUNK_SIZE};
pub use source::{AlloyLogSource, LogSource};
pub use state_machine::{ConnectionConfig, ConnectionState, WsAttemptOutcome};

#[cfg(any(test, feature = "test-utils"))]
pub use source::MockLogSource;
