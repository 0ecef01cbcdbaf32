//! The send pipeline and its background drivers.
//!
//! Data flows ingress → [`send_service::SendService`] (validate, resolve
//! template, mint id) → [`strategy`] (persist + reserve quota) → either
//! [`sender::Sender`] synchronously (immediate) or a later
//! [`scheduler::Scheduler`] tick (deferred) → [`channel`] →
//! [`provider`] selector loop → vendor client → outcome commit → the
//! [`callback`] engine. The transactional prepare/commit/cancel flow and
//! its back-check loop live in [`txn`].

pub mod callback;
pub mod channel;
pub mod config;
pub mod notification;
pub mod provider;
pub mod scheduler;
pub mod send_service;
pub mod sender;
pub mod strategy;
pub mod template;
pub mod txn;

pub use callback::{CallbackService, CallbackTask};
pub use channel::{ChannelDispatcher, NotificationChannel, SelectorChannel};
pub use config::BusinessConfigService;
pub use notification::NotificationQueryService;
pub use provider::{
    ProviderManager, ProviderSelector, SelectorBuilder, SendProvider, SequentialSelectorBuilder,
    StoreBackedSelectorBuilder, VendorProvider,
};
pub use scheduler::{Scheduler, SCHEDULER_LOCK_KEY};
pub use send_service::SendService;
pub use sender::Sender;
pub use strategy::{DeferredStrategy, ImmediateStrategy, StrategyDispatcher};
pub use template::ChannelTemplateService;
pub use txn::{TxCheckTask, TxNotificationService, CHECK_BACK_LOCK_KEY};
