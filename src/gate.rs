//! Lease-driven gate for an external scheduling loop.

use std::time::Duration;

use crate::lease::Lease;

/// Floor for the delay handed back to a leading loop, so a renewal
/// falling due never turns into a busy-wait.
const MIN_LEADER_DELAY: Duration = Duration::from_millis(100);

/// Admission gate consumed by a periodic scheduling loop.
///
/// On every tick the loop asks [`should_act_now`]; if denied it sleeps
/// for [`next_check_delay`] and asks again. The gate owns the lease and
/// advances it exactly once per `should_act_now` call; the loop's tick
/// is the only clock source.
///
/// ```no_run
/// use leasebeat::{LeaseConfig, Lease, RedisStore, SchedulerGate};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = LeaseConfig::new("redis://localhost:6379");
/// let store = Arc::new(RedisStore::new(&config)?);
/// let mut gate = SchedulerGate::new(Lease::new(&config, store)?);
///
/// loop {
///     if gate.should_act_now().await {
///         // compute and dispatch due tasks
///     }
///     tokio::time::sleep(gate.next_check_delay()).await;
/// }
/// # }
/// ```
///
/// [`should_act_now`]: SchedulerGate::should_act_now
/// [`next_check_delay`]: SchedulerGate::next_check_delay
pub struct SchedulerGate {
    lease: Lease,
}

impl SchedulerGate {
    /// Wrap a lease.
    pub fn new(lease: Lease) -> Self {
        Self { lease }
    }

    /// Advance the lease one step and report whether this process is the
    /// leader right now. Performs at most one store round trip.
    pub async fn should_act_now(&mut self) -> bool {
        self.lease.tick().await;
        self.lease.is_leader()
    }

    /// How long the loop should wait before the next check.
    ///
    /// While not leader this is the full renewal interval (poll for
    /// acquisition). While leader it is the time until the next renewal
    /// falls due, floored so the loop's own cadence governs its work
    /// interval rather than this gate.
    pub fn next_check_delay(&self) -> Duration {
        if !self.lease.is_leader() {
            return self.lease.renew_interval();
        }

        let until_renewal = self.lease.time_until_renewal();
        if until_renewal.is_zero() {
            MIN_LEADER_DELAY.min(self.lease.renew_interval())
        } else {
            until_renewal
        }
    }

    /// Release the lease on graceful shutdown. Best-effort, see
    /// [`Lease::release`].
    pub async fn release(&mut self) {
        self.lease.release().await;
    }

    /// The wrapped lease, for diagnostics.
    pub fn lease(&self) -> &Lease {
        &self.lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CoordinationStore, MemoryStore};
    use crate::{LeaseConfig, LeaseConfigBuilder};
    use std::sync::Arc;

    fn config() -> LeaseConfig {
        LeaseConfigBuilder::new()
            .key("test:lock")
            .ttl(Duration::from_secs(60))
            .renew_interval(Duration::from_secs(15))
            .build()
    }

    fn gate(store: Arc<MemoryStore>) -> SchedulerGate {
        SchedulerGate::new(Lease::new(&config(), store).unwrap())
    }

    #[tokio::test]
    async fn test_grants_when_lease_acquired() {
        let store = Arc::new(MemoryStore::new());
        let mut gate = gate(store);
        assert!(gate.should_act_now().await);
        assert!(gate.lease().is_leader());
    }

    #[tokio::test]
    async fn test_denies_while_contended() {
        let store = Arc::new(MemoryStore::new());
        store
            .try_acquire("test:lock", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let mut gate = gate(store);
        assert!(!gate.should_act_now().await);
        assert_eq!(gate.next_check_delay(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_delay_tracks_renewal_due_time() {
        let store = Arc::new(MemoryStore::new());
        let mut gate = gate(store);

        assert!(gate.should_act_now().await);
        assert_eq!(gate.next_check_delay(), Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(gate.next_check_delay(), Duration::from_secs(5));

        // Renewal overdue: the floor keeps the loop from spinning.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(gate.next_check_delay(), MIN_LEADER_DELAY);
    }

    #[tokio::test]
    async fn test_release_steps_down() {
        let store = Arc::new(MemoryStore::new());
        let mut gate = gate(store.clone());

        assert!(gate.should_act_now().await);
        gate.release().await;
        assert!(!gate.lease().is_leader());
        assert_eq!(store.holder_of("test:lock").await, None);
    }
}
