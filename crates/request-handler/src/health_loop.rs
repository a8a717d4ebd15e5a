//! Container registry health-check timer (spec §4.5, "Health-check loop"): every tick, if the
//! registry collaborator reports zero containers, call `reload()` and log the recovery.
//! Grounded on `crate::retry_loop`'s timer shape, itself grounded on `ghost-fleet/src/
//! service.rs`'s auxiliary timer tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_core::Registry;

/// Default interval between health-check ticks (spec §4.5 default).
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Drives the registry health-check timer.
pub struct HealthCheckLoop<R> {
    registry: Arc<R>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<R> HealthCheckLoop<R>
where
    R: Registry + 'static,
{
    /// Build a health-check loop over `registry`, polling every `interval`.
    #[must_use]
    pub fn new(registry: Arc<R>, interval: Duration) -> Self {
        Self { registry, interval, shutdown: CancellationToken::new() }
    }

    /// Spawn the health-check timer as a background task.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move { self.run().await });
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!("health-check loop stopped");
    }

    async fn tick(&self) {
        if self.registry.stats().container_count > 0 {
            return;
        }
        warn!("registry reports zero containers, attempting reload");
        match self.registry.reload().await {
            Ok(()) => {
                let recovered = self.registry.stats().container_count;
                info!(recovered, "registry reload recovered containers");
            }
            Err(e) => warn!(error = %e, "registry reload failed, will retry next tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AgentError, ContainerMetadata, RegistryStats};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyRegistry {
        count: AtomicUsize,
        reload_calls: AtomicUsize,
    }

    #[async_trait]
    impl Registry for FlakyRegistry {
        async fn load(&self) -> Result<(), AgentError> {
            Ok(())
        }

        async fn reload(&self) -> Result<(), AgentError> {
            self.reload_calls.fetch_add(1, Ordering::SeqCst);
            self.count.store(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_container(&self, _container_id: &str) -> Option<ContainerMetadata> {
            None
        }

        fn supports(&self, _container_id: alloy::primitives::B256) -> bool {
            true
        }

        fn stats(&self) -> RegistryStats {
            RegistryStats { container_count: self.count.load(Ordering::SeqCst) }
        }
    }

    #[tokio::test]
    async fn tick_reloads_when_empty() {
        let registry = Arc::new(FlakyRegistry { count: AtomicUsize::new(0), reload_calls: AtomicUsize::new(0) });
        let loop_ = HealthCheckLoop::new(Arc::clone(&registry), Duration::from_secs(1));
        loop_.tick().await;
        assert_eq!(registry.reload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats().container_count, 1);
    }

    #[tokio::test]
    async fn tick_skips_reload_when_containers_present() {
        let registry = Arc::new(FlakyRegistry { count: AtomicUsize::new(3), reload_calls: AtomicUsize::new(0) });
        let loop_ = HealthCheckLoop::new(Arc::clone(&registry), Duration::from_secs(1));
        loop_.tick().await;
        assert_eq!(registry.reload_calls.load(Ordering::SeqCst), 0);
    }
}
