//! Redis sorted-set event store.
//!
//! Each client key maps to one sorted set whose members and scores are both
//! the event timestamp in microseconds.

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{EventStore, StoreError};

/// Connection settings for the Redis event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix prepended to every client key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Send insert, prune and read as one MULTI/EXEC transaction
    #[serde(default)]
    pub atomic: bool,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            atomic: false,
        }
    }
}

/// Environment variable naming the Redis `host:port` when no URL is configured.
const REDIS_ADDR_ENV: &str = "REDIS_ADDR";

fn default_redis_url() -> String {
    redis_url_from_addr(std::env::var(REDIS_ADDR_ENV).ok().as_deref())
}

/// Turn a bare `host:port` into a connection URL.
fn redis_url_from_addr(addr: Option<&str>) -> String {
    match addr.map(str::trim).filter(|addr| !addr.is_empty()) {
        Some(addr) if addr.contains("://") => addr.to_string(),
        Some(addr) => format!("redis://{}", addr),
        None => "redis://localhost:6379".to_string(),
    }
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

/// Event store backed by a Redis server shared by all limiter instances.
#[derive(Clone)]
pub struct RedisEventStore {
    conn: ConnectionManager,
    key_prefix: String,
    atomic: bool,
}

impl std::fmt::Debug for RedisEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventStore")
            .field("key_prefix", &self.key_prefix)
            .field("atomic", &self.atomic)
            .finish()
    }
}

impl RedisEventStore {
    /// Connect to Redis using the given settings.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        info!(
            url = %config.url,
            key_prefix = %config.key_prefix,
            atomic = config.atomic,
            "Connected to Redis event store"
        );

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            atomic: config.atomic,
        })
    }

    fn redis_key(&self, key: &str) -> String {
        namespaced_key(&self.key_prefix, key)
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Exclusive upper bound for ZREMRANGEBYSCORE, so `cutoff` itself survives.
fn exclusive_bound(cutoff: i64) -> String {
    format!("({}", cutoff)
}

fn parse_members(key: &str, members: Vec<String>) -> Vec<i64> {
    members
        .into_iter()
        .filter_map(|member| match member.parse::<i64>() {
            Ok(ts) => Some(ts),
            Err(_) => {
                warn!(key = %key, member = %member, "Skipping unparsable event member");
                None
            }
        })
        .collect()
}

#[async_trait]
impl EventStore for RedisEventStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn add_event(&self, key: &str, timestamp: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(self.redis_key(key), timestamp, timestamp).await?;
        Ok(())
    }

    async fn remove_events_before(&self, key: &str, cutoff: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrembyscore(self.redis_key(key), "-inf", exclusive_bound(cutoff))
            .await?;
        Ok(())
    }

    async fn list_events(&self, key: &str) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrange(self.redis_key(key), 0, -1).await?;
        Ok(parse_members(key, members))
    }

    async fn record_and_list(
        &self,
        key: &str,
        timestamp: i64,
        cutoff: i64,
    ) -> Result<Vec<i64>, StoreError> {
        if !self.atomic {
            self.add_event(key, timestamp).await?;
            self.remove_events_before(key, cutoff).await?;
            return self.list_events(key).await;
        }

        let redis_key = self.redis_key(key);
        let mut conn = self.conn.clone();
        let (members,): (Vec<String>,) = ::redis::pipe()
            .atomic()
            .zadd(redis_key.as_str(), timestamp, timestamp)
            .ignore()
            .zrembyscore(redis_key.as_str(), "-inf", exclusive_bound(cutoff))
            .ignore()
            .zrange(redis_key.as_str(), 0, -1)
            .query_async(&mut conn)
            .await?;

        Ok(parse_members(key, members))
    }
}
