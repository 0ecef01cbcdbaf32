//! Per-(tenant, channel) quota counters.
//!
//! Reservation happens before the notification insert and must be atomic:
//! a single `decr` is a script-based compare-and-decrement so an
//! over-subscribed counter is never visible negative, and the batch
//! variants apply all-or-nothing across an arbitrary set of keys.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::Script;

use courier_core::notification::Channel;
use courier_core::{CoreError, CoreResult};

/// One `(biz_id, channel)` delta in a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaItem {
    pub biz_id: i64,
    pub channel: Channel,
    pub n: i32,
}

pub fn quota_key(biz_id: i64, channel: Channel) -> String {
    format!("quota:{biz_id}:{channel}")
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomic decrement; fails with [`CoreError::NoQuota`] (naming the key)
    /// when the balance is insufficient, applying nothing.
    async fn decr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()>;

    /// Atomic increment; creates the key when absent. Never fails
    /// logically.
    async fn incr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()>;

    /// All-or-nothing batch decrement; on insufficiency names the first
    /// offending key and applies no mutation.
    async fn multi_decr(&self, items: &[QuotaItem]) -> CoreResult<()>;

    /// Atomic batch increment (creates missing keys).
    async fn multi_incr(&self, items: &[QuotaItem]) -> CoreResult<()>;

    /// Seed a counter to an absolute value (config sync / tests).
    async fn set(&self, biz_id: i64, channel: Channel, value: i64) -> CoreResult<()>;

    /// Current balance, if the key exists.
    async fn get(&self, biz_id: i64, channel: Channel) -> CoreResult<Option<i64>>;
}

/// Compare-and-decrement: only applies when the balance covers the delta.
const DECR_SCRIPT: &str = r#"
local balance = tonumber(redis.call('GET', KEYS[1]) or '0')
local n = tonumber(ARGV[1])
if balance < n then
  return -1
end
return redis.call('DECRBY', KEYS[1], n)
"#;

const INCR_SCRIPT: &str = r#"
return redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
"#;

/// All keys are checked before any is mutated; returns the first offending
/// key, or the empty string on success.
const MULTI_DECR_SCRIPT: &str = r#"
for i, key in ipairs(KEYS) do
  local balance = tonumber(redis.call('GET', key) or '0')
  if balance < tonumber(ARGV[i]) then
    return key
  end
end
for i, key in ipairs(KEYS) do
  redis.call('DECRBY', key, tonumber(ARGV[i]))
end
return ''
"#;

const MULTI_INCR_SCRIPT: &str = r#"
for i, key in ipairs(KEYS) do
  redis.call('INCRBY', key, tonumber(ARGV[i]))
end
return ''
"#;

/// Redis-backed quota counters shared across replicas.
#[derive(Clone)]
pub struct RedisQuotaStore {
    client: redis::Client,
    decr: Script,
    incr: Script,
    multi_decr: Script,
    multi_incr: Script,
}

impl RedisQuotaStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            decr: Script::new(DECR_SCRIPT),
            incr: Script::new(INCR_SCRIPT),
            multi_decr: Script::new(MULTI_DECR_SCRIPT),
            multi_incr: Script::new(MULTI_INCR_SCRIPT),
        }
    }

    async fn connection(&self) -> CoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::storage(format!("redis connect: {e}")))
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn decr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()> {
        let key = quota_key(biz_id, channel);
        let mut conn = self.connection().await?;
        let result: i64 = self
            .decr
            .key(&key)
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota decr: {e}")))?;
        if result < 0 {
            return Err(CoreError::NoQuota(key));
        }
        Ok(())
    }

    async fn incr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .incr
            .key(quota_key(biz_id, channel))
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota incr: {e}")))?;
        Ok(())
    }

    async fn multi_decr(&self, items: &[QuotaItem]) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut script = self.multi_decr.prepare_invoke();
        for item in items {
            script.key(quota_key(item.biz_id, item.channel));
        }
        for item in items {
            script.arg(item.n);
        }
        let offending: String = script
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota multi decr: {e}")))?;
        if !offending.is_empty() {
            return Err(CoreError::NoQuota(offending));
        }
        Ok(())
    }

    async fn multi_incr(&self, items: &[QuotaItem]) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut script = self.multi_incr.prepare_invoke();
        for item in items {
            script.key(quota_key(item.biz_id, item.channel));
        }
        for item in items {
            script.arg(item.n);
        }
        let _: String = script
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota multi incr: {e}")))?;
        Ok(())
    }

    async fn set(&self, biz_id: i64, channel: Channel, value: i64) -> CoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(quota_key(biz_id, channel))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota set: {e}")))
    }

    async fn get(&self, biz_id: i64, channel: Channel) -> CoreResult<Option<i64>> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(quota_key(biz_id, channel))
            .query_async::<_, Option<i64>>(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("quota get: {e}")))
    }
}

/// In-memory quota counters with the same semantics, for tests and the
/// dev wiring.
#[derive(Default)]
pub struct MemoryQuotaStore {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn decr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()> {
        let key = quota_key(biz_id, channel);
        let mut counters = self.lock();
        let balance = counters.get(&key).copied().unwrap_or(0);
        if balance < i64::from(n) {
            return Err(CoreError::NoQuota(key));
        }
        counters.insert(key, balance - i64::from(n));
        Ok(())
    }

    async fn incr(&self, biz_id: i64, channel: Channel, n: i32) -> CoreResult<()> {
        let key = quota_key(biz_id, channel);
        let mut counters = self.lock();
        *counters.entry(key).or_insert(0) += i64::from(n);
        Ok(())
    }

    async fn multi_decr(&self, items: &[QuotaItem]) -> CoreResult<()> {
        let mut counters = self.lock();
        for item in items {
            let key = quota_key(item.biz_id, item.channel);
            if counters.get(&key).copied().unwrap_or(0) < i64::from(item.n) {
                return Err(CoreError::NoQuota(key));
            }
        }
        for item in items {
            let key = quota_key(item.biz_id, item.channel);
            *counters.entry(key).or_insert(0) -= i64::from(item.n);
        }
        Ok(())
    }

    async fn multi_incr(&self, items: &[QuotaItem]) -> CoreResult<()> {
        let mut counters = self.lock();
        for item in items {
            let key = quota_key(item.biz_id, item.channel);
            *counters.entry(key).or_insert(0) += i64::from(item.n);
        }
        Ok(())
    }

    async fn set(&self, biz_id: i64, channel: Channel, value: i64) -> CoreResult<()> {
        self.lock().insert(quota_key(biz_id, channel), value);
        Ok(())
    }

    async fn get(&self, biz_id: i64, channel: Channel) -> CoreResult<Option<i64>> {
        Ok(self.lock().get(&quota_key(biz_id, channel)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decr_refuses_to_go_negative() {
        let store = MemoryQuotaStore::new();
        store.set(42, Channel::Sms, 1).await.unwrap();

        store.decr(42, Channel::Sms, 1).await.unwrap();
        let err = store.decr(42, Channel::Sms, 1).await.unwrap_err();
        assert_eq!(err, CoreError::NoQuota("quota:42:SMS".into()));
        assert_eq!(store.get(42, Channel::Sms).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn incr_creates_missing_keys() {
        let store = MemoryQuotaStore::new();
        store.incr(42, Channel::Email, 5).await.unwrap();
        assert_eq!(store.get(42, Channel::Email).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn multi_decr_is_all_or_nothing() {
        let store = MemoryQuotaStore::new();
        store.set(42, Channel::Sms, 10).await.unwrap();
        store.set(42, Channel::Email, 1).await.unwrap();

        let err = store
            .multi_decr(&[
                QuotaItem { biz_id: 42, channel: Channel::Sms, n: 3 },
                QuotaItem { biz_id: 42, channel: Channel::Email, n: 2 },
            ])
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NoQuota("quota:42:EMAIL".into()));

        // Nothing was applied.
        assert_eq!(store.get(42, Channel::Sms).await.unwrap(), Some(10));
        assert_eq!(store.get(42, Channel::Email).await.unwrap(), Some(1));

        store
            .multi_decr(&[
                QuotaItem { biz_id: 42, channel: Channel::Sms, n: 3 },
                QuotaItem { biz_id: 42, channel: Channel::Email, n: 1 },
            ])
            .await
            .unwrap();
        assert_eq!(store.get(42, Channel::Sms).await.unwrap(), Some(7));
        assert_eq!(store.get(42, Channel::Email).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn reserve_then_release_round_trips() {
        let store = MemoryQuotaStore::new();
        store.set(42, Channel::Sms, 100).await.unwrap();
        let items = [QuotaItem { biz_id: 42, channel: Channel::Sms, n: 7 }];
        store.multi_decr(&items).await.unwrap();
        store.multi_incr(&items).await.unwrap();
        assert_eq!(store.get(42, Channel::Sms).await.unwrap(), Some(100));
    }
}
