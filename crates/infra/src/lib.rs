//! Infrastructure for the courier notification platform.
//!
//! Every port in this crate comes in (at least) two implementations: the
//! production one (Postgres via `sqlx`, Redis for counters/leases/shared
//! cache, HTTP via `reqwest`) and an in-memory one used by tests and the
//! self-contained dev wiring.

pub mod cache;
pub mod lease;
pub mod loopjob;
pub mod quota;
pub mod repository;
pub mod rpc;
pub mod secrets;
pub mod store;

pub use lease::{LockClient, LockGuard, MemoryLockClient, RedisLockClient};
pub use loopjob::{LoopJob, LoopStep};
pub use quota::{MemoryQuotaStore, QuotaItem, QuotaStore, RedisQuotaStore};
pub use secrets::SecretBox;
pub use store::StoreError;
