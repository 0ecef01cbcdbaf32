//! Error model.
//!
//! The platform distinguishes two propagation tiers:
//!
//! - **business errors**: predictable, caller-actionable, encoded in the
//!   response body as a stable [`ErrorCode`];
//! - **system errors**: unexpected and retry-worthy (storage failures, CAS
//!   misses, duplicate-key races, external-service faults), surfaced as
//!   transport-level failures and never embedded in the response envelope.
//!
//! Failures are typed by kind and routed by matching on the enum, never by
//! string comparison. The API layer owns the single translation point from
//! [`CoreError`] to wire codes.

use thiserror::Error;

/// Result type used across the domain and service layers.
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable wire codes for business errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParameter,
    TemplateNotFound,
    ChannelDisabled,
    RateLimited,
    BizIdNotFound,
    SendNotificationFailed,
    CreateNotificationFailed,
    NotificationNotFound,
    NoAvailableProvider,
    NoAvailableChannel,
    ConfigNotFound,
    NoQuotaConfig,
    NoQuota,
    QuotaNotFound,
    ProviderNotFound,
    UnknownChannel,
    BatchSizeOverLimit,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ErrorCode::ChannelDisabled => "CHANNEL_DISABLED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::BizIdNotFound => "BIZ_ID_NOT_FOUND",
            ErrorCode::SendNotificationFailed => "SEND_NOTIFICATION_FAILED",
            ErrorCode::CreateNotificationFailed => "CREATE_NOTIFICATION_FAILED",
            ErrorCode::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            ErrorCode::NoAvailableProvider => "NO_AVAILABLE_PROVIDER",
            ErrorCode::NoAvailableChannel => "NO_AVAILABLE_CHANNEL",
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::NoQuotaConfig => "NO_QUOTA_CONFIG",
            ErrorCode::NoQuota => "NO_QUOTA",
            ErrorCode::QuotaNotFound => "QUOTA_NOT_FOUND",
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::UnknownChannel => "UNKNOWN_CHANNEL",
            ErrorCode::BatchSizeOverLimit => "BATCH_SIZE_OVER_LIMIT",
        }
    }
}

/// Platform error, spanning business and system kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    // Business kinds.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("template not found: {0}")]
    TemplateNotFound(i64),

    #[error("channel disabled: {0}")]
    ChannelDisabled(String),

    #[error("rate limited")]
    RateLimited,

    #[error("biz id not found")]
    BizIdNotFound,

    #[error("send notification failed: {0}")]
    SendNotificationFailed(String),

    #[error("create notification failed: {0}")]
    CreateNotificationFailed(String),

    #[error("notification not found")]
    NotificationNotFound,

    #[error("no available provider")]
    NoAvailableProvider,

    #[error("no available channel: {0}")]
    NoAvailableChannel(String),

    #[error("business config not found")]
    ConfigNotFound,

    #[error("no quota config for tenant")]
    NoQuotaConfig,

    #[error("quota exhausted: {0}")]
    NoQuota(String),

    #[error("quota not found: {0}")]
    QuotaNotFound(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("unknown channel")]
    UnknownChannel,

    #[error("batch size over limit: {got} > {limit}")]
    BatchSizeOverLimit { got: usize, limit: usize },

    // System kinds.
    #[error("duplicate notification key")]
    Duplicate,

    #[error("version mismatch on notification {0}")]
    VersionMismatch(i64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("external service error: {0}")]
    ExternalService(String),
}

impl CoreError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendNotificationFailed(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    /// System errors surface as transport failures; everything else carries
    /// a stable business code in the response body.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            CoreError::Duplicate
                | CoreError::VersionMismatch(_)
                | CoreError::Storage(_)
                | CoreError::ExternalService(_)
        )
    }

    /// Wire code for business errors; `None` for system errors.
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            CoreError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            CoreError::TemplateNotFound(_) => ErrorCode::TemplateNotFound,
            CoreError::ChannelDisabled(_) => ErrorCode::ChannelDisabled,
            CoreError::RateLimited => ErrorCode::RateLimited,
            CoreError::BizIdNotFound => ErrorCode::BizIdNotFound,
            CoreError::SendNotificationFailed(_) => ErrorCode::SendNotificationFailed,
            CoreError::CreateNotificationFailed(_) => ErrorCode::CreateNotificationFailed,
            CoreError::NotificationNotFound => ErrorCode::NotificationNotFound,
            CoreError::NoAvailableProvider => ErrorCode::NoAvailableProvider,
            CoreError::NoAvailableChannel(_) => ErrorCode::NoAvailableChannel,
            CoreError::ConfigNotFound => ErrorCode::ConfigNotFound,
            CoreError::NoQuotaConfig => ErrorCode::NoQuotaConfig,
            CoreError::NoQuota(_) => ErrorCode::NoQuota,
            CoreError::QuotaNotFound(_) => ErrorCode::QuotaNotFound,
            CoreError::ProviderNotFound(_) => ErrorCode::ProviderNotFound,
            CoreError::UnknownChannel => ErrorCode::UnknownChannel,
            CoreError::BatchSizeOverLimit { .. } => ErrorCode::BatchSizeOverLimit,
            CoreError::Duplicate
            | CoreError::VersionMismatch(_)
            | CoreError::Storage(_)
            | CoreError::ExternalService(_) => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_errors_have_no_wire_code() {
        assert!(CoreError::Duplicate.is_system());
        assert!(CoreError::VersionMismatch(1).is_system());
        assert!(CoreError::storage("down").is_system());
        assert!(CoreError::Duplicate.code().is_none());
        assert!(CoreError::VersionMismatch(1).code().is_none());
    }

    #[test]
    fn business_errors_map_to_stable_codes() {
        assert_eq!(
            CoreError::NoQuota("quota:42:SMS".into()).code(),
            Some(ErrorCode::NoQuota)
        );
        assert_eq!(
            CoreError::BatchSizeOverLimit { got: 101, limit: 100 }.code(),
            Some(ErrorCode::BatchSizeOverLimit)
        );
        assert_eq!(ErrorCode::NoQuota.as_str(), "NO_QUOTA");
        assert!(!CoreError::NoAvailableProvider.is_system());
    }
}
