//! Periodic commitment generation: subscription discovery (sync timer) and per-interval
//! `prepareNextInterval` calls (cron timer), with retry-capped, stale-tx-pruned per-subscription
//! state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          interval-scheduler                              │
//! │                                                                          │
//! │  state     — TrackedSet / CommittedSet bookkeeping                       │
//! │  circuit   — retry-cap classification, stale-tx pruning                  │
//! │  scheduler — IntervalScheduler: sync_loop + cron_loop, start()/stop()    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod circuit;
pub mod error;
pub mod scheduler;
pub mod state;

pub use circuit::{classify_prepare_failure, PrepareOutcome, DEFAULT_MAX_RETRY_ATTEMPTS, STALE_TX_THRESHOLD};
pub use error::{Result, SchedulerError};
pub use scheduler::{IntervalScheduler, SchedulerConfig, SchedulerEvents, SchedulerStats, SYNC_BATCH_SIZE};
pub use state::{CommittedSet, TrackedSet};
