//! Lease state machine.
//!
//! One [`Lease`] per process, driven by the owning scheduling loop. The
//! store's TTL is the single source of truth for ownership: every store
//! response overwrites local belief, and a process that cannot reach the
//! store reports non-leader until a fresh acquire succeeds.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LeaseConfig;
use crate::error::ConfigError;
use crate::store::CoordinationStore;

/// Local belief about lease ownership. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Not holding the lock.
    Unheld,
    /// Holding a live entry as of the last store response.
    Held,
    /// Store unreachable. Treated as not-leader for safety.
    Unknown,
}

/// A time-bounded ownership claim on a shared key.
///
/// The lease performs no background work; it advances only when [`tick`]
/// is called, so it must be driven from a single loop. A process that
/// stops ticking simply lets its entry expire.
///
/// [`tick`]: Lease::tick
pub struct Lease {
    key: String,
    holder_id: String,
    ttl: Duration,
    renew_interval: Duration,
    op_timeout: Duration,
    state: LeaseState,
    last_renewed: Option<Instant>,
    store: Arc<dyn CoordinationStore>,
}

fn generate_holder_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}-{}-{}", host, std::process::id(), Uuid::new_v4())
}

impl Lease {
    /// Create a lease bound to the configured key and store.
    ///
    /// Validates the configuration; invalid TTL/interval ratios or
    /// malformed targets fail here, before any tick runs.
    pub fn new(
        config: &LeaseConfig,
        store: Arc<dyn CoordinationStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            key: config.key.clone(),
            holder_id: generate_holder_id(),
            ttl: config.ttl,
            renew_interval: config.renew_interval,
            op_timeout: config.op_timeout(),
            state: LeaseState::Unheld,
            last_renewed: None,
            store,
        })
    }

    /// Check leadership without touching the store. Returns the cached
    /// outcome of the last tick.
    pub fn is_leader(&self) -> bool {
        self.state == LeaseState::Held
    }

    /// Current state of the state machine.
    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// This process's unique holder token.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Instant of the last successful acquire or renew. Diagnostics only.
    pub fn last_renewed(&self) -> Option<Instant> {
        self.last_renewed
    }

    /// Configured renewal interval.
    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }

    /// Time remaining until the next renewal is due, or zero when one is
    /// due now (or when not leader).
    pub fn time_until_renewal(&self) -> Duration {
        match (self.state, self.last_renewed) {
            (LeaseState::Held, Some(at)) => self.renew_interval.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Advance the state machine by one step.
    ///
    /// Performs at most one store round trip. All store errors are
    /// absorbed into a state transition; callers only ever observe the
    /// resulting state.
    pub async fn tick(&mut self) {
        match self.state {
            LeaseState::Unheld | LeaseState::Unknown => self.attempt_acquire().await,
            LeaseState::Held => self.attempt_renew().await,
        }
    }

    async fn attempt_acquire(&mut self) {
        match self
            .store
            .try_acquire(&self.key, &self.holder_id, self.ttl)
            .await
        {
            Ok(true) => {
                info!(
                    key = %self.key,
                    holder_id = %self.holder_id,
                    "Acquired lease, becoming leader"
                );
                self.state = LeaseState::Held;
                self.last_renewed = Some(Instant::now());
            }
            Ok(false) => {
                debug!(key = %self.key, "Lease held elsewhere, staying follower");
                self.state = LeaseState::Unheld;
            }
            Err(e) => {
                warn!(key = %self.key, "Store unreachable during acquire: {}", e);
                self.state = LeaseState::Unknown;
            }
        }
    }

    async fn attempt_renew(&mut self) {
        // The driving loop may tick faster than the renewal cadence.
        // Skip the round trip until a renewal is actually due.
        if let Some(at) = self.last_renewed {
            if at.elapsed() < self.renew_interval {
                return;
            }
        }

        match self
            .store
            .try_extend(&self.key, &self.holder_id, self.ttl)
            .await
        {
            Ok(true) => {
                debug!(key = %self.key, "Renewed lease");
                self.last_renewed = Some(Instant::now());
            }
            Ok(false) => {
                // The store has revoked ownership. Downgrade now rather
                // than hoping the next renewal succeeds; staying Held
                // here is how split-brain windows open.
                warn!(
                    key = %self.key,
                    holder_id = %self.holder_id,
                    "Lease revoked by store, stepping down"
                );
                self.state = LeaseState::Unheld;
                self.last_renewed = None;
            }
            Err(e) => {
                // Cannot tell whether another process has taken over.
                warn!(
                    key = %self.key,
                    "Store unreachable during renew, stepping down: {}",
                    e
                );
                self.state = LeaseState::Unknown;
                self.last_renewed = None;
            }
        }
    }

    /// Release the lease on graceful shutdown. Best-effort: a single
    /// attempt bounded by the operation timeout, failures logged and
    /// swallowed. TTL expiry is the backstop either way.
    pub async fn release(&mut self) {
        if self.state != LeaseState::Held {
            return;
        }

        let attempt = tokio::time::timeout(
            self.op_timeout,
            self.store.try_release(&self.key, &self.holder_id),
        )
        .await;

        match attempt {
            Ok(Ok(true)) => info!(key = %self.key, "Released lease"),
            Ok(Ok(false)) => debug!(key = %self.key, "Lease already gone at release"),
            Ok(Err(e)) => error!(key = %self.key, "Error releasing lease: {}", e),
            Err(_) => error!(key = %self.key, "Timed out releasing lease"),
        }

        self.state = LeaseState::Unheld;
        self.last_renewed = None;
    }
}
