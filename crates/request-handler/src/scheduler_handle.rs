//! Narrow seam onto the scheduler: the handler needs only `mark_committed` (spec §4.5 step 5),
//! not the scheduler's full generic surface. Grounded on `chain_client::traits`'s blanket
//! `Arc<T>` pattern.

use std::sync::Arc;

use interval_scheduler::{IntervalScheduler, SchedulerEvents};

/// What the handler needs from the scheduler after a request starts.
pub trait SchedulerHandle: Send + Sync {
    /// Record `(subscription_id, interval)` as committed so the scheduler's cron timer does
    /// not duplicate the work this handler is about to perform.
    fn mark_committed(&self, subscription_id: u64, interval: u32);
}

impl<C, R, E> SchedulerHandle for IntervalScheduler<C, R, E>
where
    C: chain_client::RouterChain + chain_client::CoordinatorChain + 'static,
    R: agent_core::Registry + 'static,
    E: SchedulerEvents + 'static,
{
    fn mark_committed(&self, subscription_id: u64, interval: u32) {
        IntervalScheduler::mark_committed(self, subscription_id, interval);
    }
}

impl<T: SchedulerHandle + ?Sized> SchedulerHandle for Arc<T> {
    fn mark_committed(&self, subscription_id: u64, interval: u32) {
        (**self).mark_committed(subscription_id, interval);
    }
}
