//! Snowflake-variant notification ID generation.
//!
//! Layout of the 64-bit ID, from the high bits down:
//!
//! ```text
//! | 41 bits: ms since 2024-01-01 UTC | 10 bits: hash(biz_id, key) | 12 bits: sequence |
//! ```
//!
//! The hash slice keeps notifications of the same `(biz_id, key)` colocated
//! for a future shard split; the sequence is a process-wide monotonic
//! counter wrapping modulo 4096. The epoch is recent enough that the
//! timestamp field will not overflow for ~69 years; there is no
//! clock-backwards handling, and if that ever becomes a concern the
//! generator must refuse to issue IDs rather than risk reuse.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

const TIMESTAMP_BITS: u32 = 41;
const HASH_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const HASH_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = HASH_BITS + SEQUENCE_BITS;

const TIMESTAMP_MASK: i64 = (1 << TIMESTAMP_BITS) - 1;
const HASH_MASK: i64 = (1 << HASH_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// 2024-01-01 00:00:00 UTC in epoch milliseconds.
const EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// Process-wide ID generator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    sequence: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            sequence: AtomicI64::new(0),
        }
    }

    /// Mint an ID for `(biz_id, key)`.
    pub fn generate(&self, biz_id: i64, key: &str) -> i64 {
        let timestamp = Utc::now().timestamp_millis() - EPOCH_MILLIS;
        let hash = biz_key_hash(biz_id, key);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        (timestamp & TIMESTAMP_MASK) << TIMESTAMP_SHIFT
            | (hash & HASH_MASK) << HASH_SHIFT
            | (sequence & SEQUENCE_MASK)
    }
}

/// Recover the mint time embedded in an ID.
pub fn extract_timestamp(id: i64) -> DateTime<Utc> {
    let millis = ((id >> TIMESTAMP_SHIFT) & TIMESTAMP_MASK) + EPOCH_MILLIS;
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Recover the 10-bit hash slice embedded in an ID.
pub fn extract_hash(id: i64) -> i64 {
    (id >> HASH_SHIFT) & HASH_MASK
}

/// Recover the sequence number embedded in an ID.
pub fn extract_sequence(id: i64) -> i64 {
    id & SEQUENCE_MASK
}

/// 64-bit hash of `(biz_id, key)` with a very low collision probability.
///
/// FNV-1a over `"<biz_id>:<key>"`, then an avalanche mix salted with the
/// biz id. The top bit is cleared so the raw value always fits a positive
/// signed 64-bit number.
pub fn biz_key_hash(biz_id: i64, key: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x100_0000_01b3;

    let mut h = FNV_OFFSET;
    for byte in format!("{biz_id}:{key}").as_bytes() {
        h ^= u64::from(*byte);
        h = h.wrapping_mul(FNV_PRIME);
    }

    (mix(h, biz_id as u64) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

fn mix(mut h: u64, salt: u64) -> u64 {
    const PRIME1: u64 = 11_400_714_819_323_198_485;
    const PRIME2: u64 = 14_029_467_366_897_019_727;
    const PRIME3: u64 = 1_609_587_929_392_839_161;

    h ^= salt.wrapping_add(PRIME1);
    h = h.rotate_left(13);
    h = h.wrapping_mul(PRIME2);
    h = h.rotate_left(29);
    h = h.wrapping_mul(PRIME3);
    h.rotate_left(31)
}
