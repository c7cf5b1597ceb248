//! Redis-backed counter store.
//!
//! Keys are plain Redis strings holding integers; expiry uses Redis' native
//! TTL so the key layout stays readable by other tools.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError, RedisResult, Script};
use tracing::{debug, info};

use super::{CounterStore, StoreError, StoreResult};
use crate::config::StoreConfig;

/// Increment and (re)set the expiry in one server-side step.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
return count
"#;

/// Counter store backed by a Redis server.
pub struct RedisStore {
    /// Multiplexed, auto-reconnecting connection.
    conn: ConnectionManager,
    increment: Script,
    op_timeout: Duration,
    addr: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.addr)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server described by `config`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let op_timeout = Duration::from_millis(config.op_timeout_ms);

        info!(
            addr = %config.addr,
            db = config.db,
            op_timeout_ms = config.op_timeout_ms,
            "Connecting to Redis"
        );

        let mut conn_info = format!("redis://{}", config.addr)
            .into_connection_info()
            .map_err(unavailable)?;
        conn_info.redis.db = config.db;
        conn_info.redis.password = config.password.clone();

        let client = Client::open(conn_info).map_err(unavailable)?;
        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
            Ok(result) => result.map_err(unavailable)?,
            Err(_) => {
                return Err(StoreError::Unavailable(format!(
                    "connect to {} timed out after {:?}",
                    config.addr, op_timeout
                )))
            }
        };

        Ok(Self {
            conn,
            increment: Script::new(INCREMENT_SCRIPT),
            op_timeout,
            addr: config.addr.clone(),
        })
    }

    /// Round-trip a PING to verify the server answers.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "Redis answered ping");
        Ok(())
    }

    /// Run one Redis round trip under the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        self.timed(op, fut).await?.map_err(unavailable)
    }

    /// Like `bounded`, but hands server errors back to the caller.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> StoreResult<RedisResult<T>>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!("{} timed out after {:?}", op, self.op_timeout))
            })
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// `INCR` on a key holding something other than an integer.
fn is_not_integer(err: &RedisError) -> bool {
    err.to_string().contains("not an integer")
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let mut invocation = self.increment.key(key);
        invocation.arg(window_secs);

        let reply: RedisResult<i64> = self
            .timed("INCR", invocation.invoke_async(&mut conn))
            .await?;

        match reply {
            Ok(count) => Ok(count),
            Err(err) if is_not_integer(&err) => {
                let raw: Option<String> = self.bounded("GET", conn.get(key)).await?;
                Err(StoreError::MalformedValue {
                    key: key.to_string(),
                    value: raw.unwrap_or_default(),
                })
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: Option<String> = self.bounded("GET", conn.get(key)).await?;

        match value {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| StoreError::MalformedValue {
                key: key.to_string(),
                value: raw,
            }),
        }
    }

    async fn get_ttl_seconds(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = self.bounded("TTL", conn.ttl(key)).await?;

        // -2: no such key, -1: key without expiry.
        Ok(ttl.max(0))
    }

    async fn set_with_expiry(&self, key: &str, value: i64, window_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();

        if window_secs == 0 {
            let _: () = self.bounded("SET", conn.set(key, value)).await?;
            return Ok(());
        }

        let _: () = self
            .bounded("SET", conn.set_ex(key, value, window_secs))
            .await?;
        Ok(())
    }
}
