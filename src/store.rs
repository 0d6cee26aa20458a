//! Coordination store clients.
//!
//! The lease protocol needs exactly three atomic operations against the
//! shared store. Each is a single server-side compare-and-set so that the
//! check and the mutation cannot be split by a concurrent writer.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::RedisConnectionInfo;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{LeaseConfig, StoreTarget};
use crate::error::{ConfigError, StoreError};

/// Atomic lease operations against a shared store.
///
/// Contention is reported as `Ok(false)`, never as an error; `Err` always
/// means the store could not be reached or answered abnormally.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically create `key` with value `holder_id` and expiry `ttl`,
    /// only if the key is absent or expired. Returns true iff this call
    /// created the entry.
    async fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomically reset the expiry of `key` to `ttl`, only if its current
    /// value equals `holder_id`. Returns true iff the extension succeeded.
    async fn try_extend(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomically delete `key`, only if its current value equals
    /// `holder_id`. Returns true iff deleted by this call.
    async fn try_release(&self, key: &str, holder_id: &str) -> Result<bool, StoreError>;
}

const EXTEND_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        redis.call("pexpire", KEYS[1], ARGV[2])
        return 1
    else
        return 0
    end
"#;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

enum StoreOp<'a> {
    Acquire {
        key: &'a str,
        holder_id: &'a str,
        ttl: Duration,
    },
    Extend {
        key: &'a str,
        holder_id: &'a str,
        ttl: Duration,
    },
    Release {
        key: &'a str,
        holder_id: &'a str,
    },
}

async fn run_op<C>(conn: &mut C, op: &StoreOp<'_>) -> redis::RedisResult<bool>
where
    C: redis::aio::ConnectionLike + Send,
{
    match op {
        StoreOp::Acquire {
            key,
            holder_id,
            ttl,
        } => {
            // SET NX PX is the one-shot create-if-absent with expiry.
            let result: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(holder_id)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(conn)
                .await?;
            Ok(result.is_some())
        }
        StoreOp::Extend {
            key,
            holder_id,
            ttl,
        } => {
            let result: i32 = redis::Script::new(EXTEND_SCRIPT)
                .key(*key)
                .arg(*holder_id)
                .arg(ttl.as_millis() as u64)
                .invoke_async(conn)
                .await?;
            Ok(result == 1)
        }
        StoreOp::Release { key, holder_id } => {
            let result: i32 = redis::Script::new(RELEASE_SCRIPT)
                .key(*key)
                .arg(*holder_id)
                .invoke_async(conn)
                .await?;
            Ok(result == 1)
        }
    }
}

fn map_redis_err(e: redis::RedisError) -> StoreError {
    if e.is_io_error()
        || e.is_timeout()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
        || e.is_cluster_error()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Redis(e)
    }
}

enum Backend {
    Direct {
        client: redis::Client,
        manager: Option<ConnectionManager>,
    },
    Sentinel {
        client: SentinelClient,
        conn: Option<MultiplexedConnection>,
    },
}

impl Backend {
    /// Drop any cached connection so the next operation reconnects. For
    /// sentinel targets this forces a fresh master resolution.
    fn reset(&mut self) {
        match self {
            Backend::Direct { manager, .. } => *manager = None,
            Backend::Sentinel { conn, .. } => *conn = None,
        }
    }
}

/// Redis-backed coordination store.
///
/// The topology (direct node or sentinel-resolved master) is fixed at
/// construction from the configured target. Connections are established
/// lazily, so the store can be constructed while Redis is down; operations
/// simply return [`StoreError::Unavailable`] until it recovers.
pub struct RedisStore {
    backend: Mutex<Backend>,
    op_timeout: Duration,
}

impl RedisStore {
    /// Create a store client for the configured target.
    pub fn new(config: &LeaseConfig) -> Result<Self, ConfigError> {
        let backend = match config.target()? {
            StoreTarget::Direct(url) => {
                let client = redis::Client::open(url)
                    .map_err(|e| ConfigError::InvalidTarget(e.to_string()))?;
                Backend::Direct {
                    client,
                    manager: None,
                }
            }
            StoreTarget::Sentinel {
                endpoints,
                master_name,
            } => {
                let nodes: Vec<String> = endpoints
                    .iter()
                    .map(|(host, port)| format!("redis://{host}:{port}"))
                    .collect();
                let node_info = SentinelNodeConnectionInfo {
                    tls_mode: None,
                    redis_connection_info: Some(RedisConnectionInfo {
                        db: config.database.unwrap_or(0) as i64,
                        username: config.username.clone(),
                        password: config.password.clone(),
                        ..Default::default()
                    }),
                };
                let client = SentinelClient::build(
                    nodes,
                    master_name,
                    Some(node_info),
                    SentinelServerType::Master,
                )
                .map_err(|e| ConfigError::InvalidTarget(e.to_string()))?;
                Backend::Sentinel { client, conn: None }
            }
        };

        Ok(Self {
            backend: Mutex::new(backend),
            op_timeout: config.op_timeout(),
        })
    }

    async fn exec(&self, op: StoreOp<'_>) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().await;

        let result = match &mut *backend {
            Backend::Direct { client, manager } => {
                let conn = match manager.take() {
                    Some(conn) => conn,
                    None => {
                        debug!("Connecting to Redis");
                        client
                            .get_connection_manager()
                            .await
                            .map_err(|e| StoreError::Unavailable(e.to_string()))?
                    }
                };
                run_op(manager.insert(conn), &op).await
            }
            Backend::Sentinel { client, conn } => {
                let connection = match conn.take() {
                    Some(connection) => connection,
                    None => {
                        debug!("Resolving Redis master via sentinel");
                        client
                            .get_async_connection()
                            .await
                            .map_err(|e| StoreError::Unavailable(e.to_string()))?
                    }
                };
                run_op(conn.insert(connection), &op).await
            }
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                backend.reset();
                Err(map_redis_err(e))
            }
        }
    }

    async fn timed(
        &self,
        op_name: &'static str,
        op: StoreOp<'_>,
    ) -> Result<bool, StoreError> {
        match tokio::time::timeout(self.op_timeout, self.exec(op)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Store operation {} timed out", op_name);
                self.backend.lock().await.reset();
                Err(StoreError::timeout(op_name))
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.timed(
            "try_acquire",
            StoreOp::Acquire {
                key,
                holder_id,
                ttl,
            },
        )
        .await
    }

    async fn try_extend(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.timed(
            "try_extend",
            StoreOp::Extend {
                key,
                holder_id,
                ttl,
            },
        )
        .await
    }

    async fn try_release(&self, key: &str, holder_id: &str) -> Result<bool, StoreError> {
        self.timed("try_release", StoreOp::Release { key, holder_id })
            .await
    }
}

/// In-process coordination store with real TTL semantics.
///
/// Useful for tests and single-node development. Expiry is measured on
/// the tokio clock, so paused-time tests can exercise TTL behavior.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, tokio::time::Instant)>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live holder of `key`, if any.
    pub async fn holder_of(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|(_, expires)| *expires > tokio::time::Instant::now())
            .map(|(holder, _)| holder.clone())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = tokio::time::Instant::now();
        match entries.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), (holder_id.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn try_extend(
        &self,
        key: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = tokio::time::Instant::now();
        match entries.get_mut(key) {
            Some((holder, expires)) if *expires > now && holder == holder_id => {
                *expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_release(&self, key: &str, holder_id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = tokio::time::Instant::now();
        match entries.get(key) {
            Some((holder, expires)) if *expires > now && holder == holder_id => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
