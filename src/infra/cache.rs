//! Redis-backed post cache and its disabled stand-in.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::info;

use crate::application::availability::AvailabilityTracker;
use crate::application::repos::{CacheError, PostCache};

use super::error::InfraError;

pub struct RedisPostCache {
    connection: ConnectionManager,
    health: AvailabilityTracker,
    command_timeout: Duration,
}

impl RedisPostCache {
    /// Open a managed connection, giving up after `connect_timeout`.
    ///
    /// Every later command is abandoned after `command_timeout` and counted as
    /// a failure, so a hung server trips the availability tracker.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::open(url).map_err(|err| InfraError::cache(err.to_string()))?;

        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| InfraError::cache("timed out connecting to redis"))?
            .map_err(|err| InfraError::cache(err.to_string()))?;

        info!(
            command_timeout_ms = command_timeout.as_millis() as u64,
            "redis cache connected"
        );
        Ok(Self {
            connection,
            health: AvailabilityTracker::new("cache"),
            command_timeout,
        })
    }

    async fn run<T>(
        &self,
        command: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, CacheError> {
        tracked(&self.health, self.command_timeout, command).await
    }
}

/// Run one command under `deadline` and feed the outcome into `health`.
async fn tracked<T>(
    health: &AvailabilityTracker,
    deadline: Duration,
    command: impl Future<Output = Result<T, RedisError>>,
) -> Result<T, CacheError> {
    match tokio::time::timeout(deadline, command).await {
        Ok(Ok(value)) => {
            health.record_success();
            Ok(value)
        }
        Ok(Err(err)) => {
            let err = classify_redis_error(err);
            if !matches!(err, CacheError::Command(_)) {
                health.record_failure();
            }
            Err(err)
        }
        Err(_) => {
            health.record_failure();
            Err(CacheError::Timeout)
        }
    }
}

fn classify_redis_error(err: RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Timeout
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Command(err.to_string())
    }
}

#[async_trait]
impl PostCache for RedisPostCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        self.run(conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        self.run(conn.set_ex::<_, _, ()>(key, value, seconds)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        self.run(conn.del::<_, ()>(key)).await
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }
}

/// Cache installed when Redis is disabled or unreachable: every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPostCache;

#[async_trait]
impl PostCache for DisabledPostCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = DisabledPostCache;
        cache
            .set("post:1", b"{}", Duration::from_secs(60))
            .await
            .expect("set is a no-op");
        assert!(cache.get("post:1").await.expect("get").is_none());
        cache.delete("post:1").await.expect("delete is a no-op");
        assert!(!cache.is_available());
    }

    #[tokio::test]
    async fn invalid_url_is_a_bootstrap_error() {
        let err = match RedisPostCache::connect(
            "not a url",
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .await {
            Ok(_) => panic!("expected connect to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, InfraError::Cache { .. }));
    }

    #[tokio::test]
    async fn hung_command_times_out_and_counts_as_failure() {
        let health = AvailabilityTracker::with_policy("cache", 2, Duration::from_secs(60));
        let deadline = Duration::from_millis(20);

        for _ in 0..2 {
            let result =
                tracked(&health, deadline, std::future::pending::<Result<(), RedisError>>()).await;
            assert!(matches!(result, Err(CacheError::Timeout)));
        }

        assert!(!health.is_available(), "hung cache must be marked unavailable");
    }

    #[tokio::test]
    async fn command_errors_do_not_trip_availability() {
        let health = AvailabilityTracker::with_policy("cache", 1, Duration::from_secs(60));
        let rejected = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));

        let result =
            tracked(&health, Duration::from_secs(1), async { Err::<(), _>(rejected) }).await;

        assert!(matches!(result, Err(CacheError::Command(_))));
        assert!(health.is_available());
    }

    #[tokio::test]
    async fn success_restores_availability() {
        let health = AvailabilityTracker::with_policy("cache", 1, Duration::from_secs(60));
        health.record_failure();
        assert!(!health.is_healthy());

        let value = tracked(&health, Duration::from_secs(1), async {
            Ok::<_, RedisError>(Some(b"cached".to_vec()))
        })
        .await
        .expect("command succeeds");

        assert_eq!(value.as_deref(), Some(&b"cached"[..]));
        assert!(health.is_healthy());
    }
}
