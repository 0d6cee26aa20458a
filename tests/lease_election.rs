//! Integration tests for leasebeat

use async_trait::async_trait;
use leasebeat::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a store and simulates an outage when the switch is flipped.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.try_acquire(key, holder_id, ttl).await
    }

    async fn try_extend(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.try_extend(key, holder_id, ttl).await
    }

    async fn try_release(&self, key: &str, holder_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.try_release(key, holder_id).await
    }
}

fn config() -> LeaseConfig {
    LeaseConfig::builder()
        .key("beat:lock")
        .ttl(Duration::from_secs(60))
        .renew_interval(Duration::from_secs(15))
        .build()
}

#[tokio::test]
async fn test_exactly_one_of_two_contenders_wins() {
    let store = Arc::new(MemoryStore::new());
    let mut a = Lease::new(&config(), store.clone()).unwrap();
    let mut b = Lease::new(&config(), store.clone()).unwrap();

    a.tick().await;
    b.tick().await;

    let leaders = [a.is_leader(), b.is_leader()]
        .iter()
        .filter(|l| **l)
        .count();
    assert_eq!(leaders, 1);
    assert!(a.is_leader());
    assert_eq!(b.state(), LeaseState::Unheld);
}

#[tokio::test(start_paused = true)]
async fn test_outage_forces_unknown_then_recovers() {
    let store = Arc::new(FlakyStore::new());
    let mut lease = Lease::new(&config(), store.clone()).unwrap();

    lease.tick().await;
    assert!(lease.is_leader());

    store.set_down(true);
    tokio::time::advance(Duration::from_secs(15)).await;
    lease.tick().await;
    assert_eq!(lease.state(), LeaseState::Unknown);
    assert!(!lease.is_leader());

    // Still down: keeps retrying acquire from Unknown.
    tokio::time::advance(Duration::from_secs(15)).await;
    lease.tick().await;
    assert_eq!(lease.state(), LeaseState::Unknown);

    // Store back, old entry long expired on the paused clock.
    store.set_down(false);
    tokio::time::advance(Duration::from_secs(60)).await;
    lease.tick().await;
    assert!(lease.is_leader());
}

#[tokio::test(start_paused = true)]
async fn test_outage_pauses_whole_cluster() {
    let store = Arc::new(FlakyStore::new());
    let mut a = Lease::new(&config(), store.clone()).unwrap();
    let mut b = Lease::new(&config(), store.clone()).unwrap();

    a.tick().await;
    assert!(a.is_leader());

    store.set_down(true);
    tokio::time::advance(Duration::from_secs(15)).await;
    a.tick().await;
    b.tick().await;

    // Nobody acts as leader during the outage.
    assert!(!a.is_leader());
    assert!(!b.is_leader());
}

#[tokio::test(start_paused = true)]
async fn test_failover_timeline() {
    // TTL 60s, interval 15s. A acquires at t=0, renews through t=45,
    // then crashes. Its entry expires at t=60 and B takes over on its
    // next attempt.
    let store = Arc::new(MemoryStore::new());
    let mut a = Lease::new(&config(), store.clone()).unwrap();
    let mut b = Lease::new(&config(), store.clone()).unwrap();

    // t=0
    a.tick().await;
    b.tick().await;
    assert!(a.is_leader());
    assert!(!b.is_leader());

    // t=15, 30, 45: A renews, B keeps failing to acquire.
    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(15)).await;
        a.tick().await;
        b.tick().await;
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    // A crashes: it simply stops ticking. Its entry, last renewed at
    // t=45, expires at t=105. B's attempts until then keep failing.
    tokio::time::advance(Duration::from_secs(15)).await; // t=60
    b.tick().await;
    assert!(!b.is_leader());

    tokio::time::advance(Duration::from_secs(46)).await; // t=106
    b.tick().await;
    assert!(b.is_leader());

    // A restarts: it observes the entry held by B and stays a follower.
    let mut a2 = Lease::new(&config(), store.clone()).unwrap();
    a2.tick().await;
    assert!(!a2.is_leader());
    assert_eq!(a2.state(), LeaseState::Unheld);
    assert!(b.is_leader());
}

#[tokio::test(start_paused = true)]
async fn test_gate_hands_leadership_across_processes() {
    let store = Arc::new(MemoryStore::new());
    let mut gate_a = SchedulerGate::new(Lease::new(&config(), store.clone()).unwrap());
    let mut gate_b = SchedulerGate::new(Lease::new(&config(), store.clone()).unwrap());

    assert!(gate_a.should_act_now().await);
    assert!(!gate_b.should_act_now().await);
    assert_eq!(gate_b.next_check_delay(), Duration::from_secs(15));

    // A shuts down gracefully; B picks up on its next poll without
    // waiting for TTL expiry.
    gate_a.release().await;
    tokio::time::advance(gate_b.next_check_delay()).await;
    assert!(gate_b.should_act_now().await);
}

#[tokio::test]
async fn test_release_of_absent_key_is_not_an_error() {
    let store = MemoryStore::new();
    let released = store.try_release("beat:lock", "nobody").await.unwrap();
    assert!(!released);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_leader_does_not_linger_a_cycle() {
    let store = Arc::new(MemoryStore::new());
    let mut a = Lease::new(&config(), store.clone()).unwrap();
    let mut b = Lease::new(&config(), store.clone()).unwrap();

    a.tick().await;
    assert!(a.is_leader());

    // Operator hands the lock to B by deleting A's entry.
    store.try_release("beat:lock", a.holder_id()).await.unwrap();
    b.tick().await;
    assert!(b.is_leader());

    // A finds out on its very next renewal and steps down on that tick.
    tokio::time::advance(Duration::from_secs(15)).await;
    a.tick().await;
    assert!(!a.is_leader());
    assert_eq!(a.state(), LeaseState::Unheld);

    // No double leadership from here on.
    b.tick().await;
    assert!(b.is_leader());
    assert!(!a.is_leader());
}
