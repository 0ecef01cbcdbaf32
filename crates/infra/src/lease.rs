//! Distributed leases.
//!
//! Every background loop (scheduler, back-check, callback drain) runs under
//! a named lease so at most one replica drives progress per key. The redis
//! implementation is a `SET NX PX` claim with an owner token; refresh and
//! release are owner-checked scripts so a replica that lost its lease can
//! never extend or drop someone else's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use redis::Script;

use courier_core::{CoreError, CoreResult};

/// A held lease on a named key.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Extend the lease by its original TTL. Fails when the lease has been
    /// lost to another owner.
    async fn refresh(&self) -> CoreResult<()>;

    /// Drop the lease. A lost lease releases as a no-op.
    async fn release(&self) -> CoreResult<()>;
}

/// Lease factory.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Try to claim `key` for `ttl`. Fails immediately when another owner
    /// holds it.
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> CoreResult<Box<dyn LockGuard>>;
}

const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed lease client.
#[derive(Clone)]
pub struct RedisLockClient {
    client: redis::Client,
}

impl RedisLockClient {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LockClient for RedisLockClient {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> CoreResult<Box<dyn LockGuard>> {
        let mut token_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = token_bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::storage(format!("redis connect: {e}")))?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("lease acquire: {e}")))?;

        if claimed.is_none() {
            return Err(CoreError::external(format!("lease {key} is held")));
        }

        Ok(Box::new(RedisLockGuard {
            client: self.client.clone(),
            key: key.to_string(),
            token,
            ttl,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }))
    }
}

struct RedisLockGuard {
    client: redis::Client,
    key: String,
    token: String,
    ttl: Duration,
    refresh: Script,
    release: Script,
}

#[async_trait]
impl LockGuard for RedisLockGuard {
    async fn refresh(&self) -> CoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::storage(format!("redis connect: {e}")))?;
        let extended: i64 = self
            .refresh
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("lease refresh: {e}")))?;
        if extended == 0 {
            return Err(CoreError::external(format!("lease {} lost", self.key)));
        }
        Ok(())
    }

    async fn release(&self) -> CoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::storage(format!("redis connect: {e}")))?;
        let _: i64 = self
            .release
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("lease release: {e}")))?;
        Ok(())
    }
}

type MemoryLeases = Arc<Mutex<HashMap<String, u64>>>;

/// In-memory lease client for tests and single-process dev wiring.
#[derive(Clone, Default)]
pub struct MemoryLockClient {
    leases: MemoryLeases,
}

impl MemoryLockClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockClient for MemoryLockClient {
    async fn try_acquire(
        &self,
        key: &str,
        _ttl: Duration,
    ) -> CoreResult<Box<dyn LockGuard>> {
        let token = rand::thread_rng().next_u64();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.contains_key(key) {
            return Err(CoreError::external(format!("lease {key} is held")));
        }
        leases.insert(key.to_string(), token);
        Ok(Box::new(MemoryLockGuard {
            leases: self.leases.clone(),
            key: key.to_string(),
            token,
        }))
    }
}

struct MemoryLockGuard {
    leases: MemoryLeases,
    key: String,
    token: u64,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    async fn refresh(&self) -> CoreResult<()> {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(&self.key) {
            Some(token) if *token == self.token => Ok(()),
            _ => Err(CoreError::external(format!("lease {} lost", self.key))),
        }
    }

    async fn release(&self) -> CoreResult<()> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(&self.key) == Some(&self.token) {
            leases.remove(&self.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let client = MemoryLockClient::new();
        let guard = client
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(client.try_acquire("job", Duration::from_secs(60)).await.is_err());

        guard.release().await.unwrap();
        let _again = client
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_fails_after_release() {
        let client = MemoryLockClient::new();
        let guard = client
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap();
        guard.refresh().await.unwrap();
        guard.release().await.unwrap();
        assert!(guard.refresh().await.is_err());
    }

    #[tokio::test]
    async fn stale_guard_cannot_release_the_new_owner() {
        let client = MemoryLockClient::new();
        let stale = client
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap();
        stale.release().await.unwrap();

        let _fresh = client
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap();
        // Releasing the stale guard again must not free the fresh lease.
        stale.release().await.unwrap();
        assert!(client.try_acquire("job", Duration::from_secs(60)).await.is_err());
    }
}
