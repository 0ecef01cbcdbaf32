//! Postgres-backed stores.
//!
//! All implementations share a `sqlx` connection pool and enforce the
//! platform's concurrency contracts at the database level: the unique
//! `(biz_id, key)` index, the version CAS, guarded `PREPARE ->` transitions
//! and the covering indexes behind the ready/back-check scans.
//!
//! ## Error mapping
//!
//! | Postgres error | `StoreError` |
//! |---|---|
//! | unique violation (`23505`) | `Duplicate` |
//! | `RowNotFound` | `NotFound` |
//! | anything else | `Database` |

mod callback;
mod config;
mod notification;
mod provider;
mod template;
mod txn;

pub use callback::PgCallbackLogStore;
pub use config::PgConfigStore;
pub use notification::PgNotificationStore;
pub use provider::PgProviderStore;
pub use template::PgTemplateStore;
pub use txn::PgTxNotificationStore;

use super::StoreError;

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Duplicate
        }
        _ => StoreError::Database(format!("{operation}: {err}")),
    }
}
