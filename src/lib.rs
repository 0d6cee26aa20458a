//! Lease-Based Leader Election for Periodic Schedulers
//!
//! Among N cooperating processes that each want to run a periodic
//! scheduling loop, exactly one is active at any moment, with automatic
//! failover when the active process dies or is partitioned. Ownership is
//! a single TTL-bounded key in a Redis-compatible store; the store's
//! atomic compare-and-set primitives do the cross-process coordination,
//! so the in-process side stays single-threaded and trivially testable.
//!
//! ## Features
//!
//! - **Lease state machine** - acquire, renew, eager step-down, release
//! - **Fail-safe degradation** - a process that cannot reach the store
//!   reports non-leader until a fresh acquire succeeds
//! - **Sentinel topologies** - the store client resolves the current
//!   master through a set of sentinel endpoints
//! - **Pull-based driving** - no background timers; the scheduling
//!   loop's own tick advances the lease
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leasebeat::{Lease, LeaseConfig, RedisStore, SchedulerGate};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LeaseConfig::builder()
//!         .url("redis://127.0.0.1:6379")
//!         .key("scheduler:lock")
//!         .ttl(Duration::from_secs(60))
//!         .renew_interval(Duration::from_secs(15))
//!         .build();
//!
//!     let store = Arc::new(RedisStore::new(&config)?);
//!     let mut gate = SchedulerGate::new(Lease::new(&config, store)?);
//!
//!     loop {
//!         if gate.should_act_now().await {
//!             // This process is the leader: compute and dispatch due tasks.
//!         }
//!         tokio::time::sleep(gate.next_check_delay()).await;
//!     }
//! }
//! ```
//!
//! ## Sentinel
//!
//! ```rust,ignore
//! use leasebeat::LeaseConfig;
//!
//! let config = LeaseConfig::builder()
//!     .url("sentinel://s1:26379;sentinel://s2:26379;sentinel://s3:26379")
//!     .master_name("mymaster")
//!     .build();
//! ```
//!
//! This is lease-based election, not consensus: a brief leaderless gap
//! during failover (at most one TTL) and a rare double-leader window
//! bounded by network round-trip variance are accepted by design.

pub mod config;
pub mod error;
pub mod gate;
pub mod lease;
pub mod store;

pub use config::{LeaseConfig, LeaseConfigBuilder, StoreTarget, DEFAULT_LOCK_KEY};
pub use error::{ConfigError, StoreError};
pub use gate::SchedulerGate;
pub use lease::{Lease, LeaseState};
pub use store::{CoordinationStore, MemoryStore, RedisStore};
