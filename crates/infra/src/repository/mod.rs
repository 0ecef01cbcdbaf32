//! Repositories: stores composed with the caches and counters that keep
//! them honest (quota reservation around inserts, read-through config
//! tiers, callback-log hydration).

pub mod callback;
pub mod config;
pub mod notification;

pub use callback::CallbackLogRepository;
pub use config::BusinessConfigRepository;
pub use notification::NotificationRepository;
