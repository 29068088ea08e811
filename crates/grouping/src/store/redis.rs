//! Redis-backed store shared by every process in the fleet
//!
//! Requires the `redis` feature to be enabled.

use std::future::Future;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisResult};
use async_trait::async_trait;
use trafficlight_core::{Error, Result};

use super::StoreBackend;
use crate::config::RedisConfig;

/// Redis backend over a single multiplexed connection
///
/// Every command is bounded by [`RedisConfig::operation_timeout`]; a timeout
/// surfaces as a store error like any other transport failure.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Open a client and establish the multiplexed connection
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| Error::store_with_source("connect", config.url.clone(), e))?;

        let conn = match tokio::time::timeout(
            config.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(Error::store_with_source("connect", config.url.clone(), e)),
            Err(_) => {
                return Err(Error::store(
                    "connect",
                    config.url.clone(),
                    format!("timed out after {:?}", config.connect_timeout),
                ))
            }
        };

        tracing::info!(url = %config.url, "connected to redis");
        Ok(Self { conn, config })
    }

    pub async fn from_env() -> Result<Self> {
        Self::connect(RedisConfig::from_env()?).await
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, command: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::store_with_source(operation, key, e)),
            Err(_) => Err(Error::store(
                operation,
                key,
                format!("timed out after {:?}", self.config.operation_timeout),
            )),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();
        let reply = self
            .bounded("set_if_absent", &key, async {
                let reply: Option<String> = ::redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, ::redis::RedisError>(reply)
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();
        self.bounded("delete", &key, async {
            let _removed: i64 = ::redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok::<_, ::redis::RedisError>(())
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();
        self.bounded("set", &key, async {
            let _: () = ::redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok::<_, ::redis::RedisError>(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.namespaced(key);
        let mut conn = self.conn.clone();
        self.bounded("get", &key, async {
            let value: Option<Vec<u8>> = ::redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok::<_, ::redis::RedisError>(value)
        })
        .await
    }
}
