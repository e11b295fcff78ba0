//! Primary [`Tier`] backed by Redis.
//!
//! Layout:
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `emails:active` | set | normalized subscriber emails |
//! | `email_terms:<terms_key>` | string | JSON array of watch terms |
//!
//! The subscriber set is rewritten atomically (`MULTI`/`DEL`/`SADD`/`EXEC`),
//! so readers never observe a half-written set. Every command is bounded by
//! the configured storage timeout; a timeout reports the tier unavailable.
//!
//! The connection is a [`ConnectionManager`]: when the server drops it, the
//! failing command reports the tier unavailable and the manager reconnects
//! in the background, so a restarted Redis is picked up again.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::TierError;

use super::Tier;

/// Redis set holding every active subscriber.
pub const SUBSCRIBERS_KEY: &str = "emails:active";
/// Prefix of the per-subscriber term list keys.
pub const TERMS_PREFIX: &str = "email_terms:";

pub struct RedisTier {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisTier {
    /// Parse `url` without connecting. The connection is opened lazily on
    /// first use and shared afterwards; a failed first attempt is retried on
    /// the next call.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, TierError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, TierError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout)
                    .set_number_of_retries(1);
                self.bounded(ConnectionManager::new_with_config(self.client.clone(), config))
                    .await
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, TierError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TierError::Unavailable(format!(
                "redis did not answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn terms_redis_key(key: &str) -> String {
    format!("{}{}", TERMS_PREFIX, key)
}

#[async_trait]
impl Tier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError> {
        let mut conn = self.connection().await?;
        let members: BTreeSet<String> = self.bounded(conn.smembers(SUBSCRIBERS_KEY)).await?;
        Ok(Some(members))
    }

    async fn store_subscribers(&self, subscribers: &BTreeSet<String>) -> Result<(), TierError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(SUBSCRIBERS_KEY).ignore();
        // SADD with no members is a protocol error.
        if !subscribers.is_empty() {
            let members: Vec<&str> = subscribers.iter().map(String::as_str).collect();
            pipe.sadd(SUBSCRIBERS_KEY, members).ignore();
        }
        let _: () = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn load_terms(&self, key: &str) -> Result<Option<Vec<String>>, TierError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = self.bounded(conn.get(terms_redis_key(key))).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store_terms(&self, key: &str, terms: &[String]) -> Result<(), TierError> {
        let json = serde_json::to_string(terms)?;
        let mut conn = self.connection().await?;
        let _: () = self.bounded(conn.set(terms_redis_key(key), json)).await?;
        Ok(())
    }
}
