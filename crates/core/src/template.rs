//! Channel templates, versions and provider bindings.

use serde::{Deserialize, Serialize};

use crate::notification::Channel;

/// Audit state for template versions and provider bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Pending,
    InReview,
    Rejected,
    Approved,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "PENDING",
            AuditStatus::InReview => "IN_REVIEW",
            AuditStatus::Rejected => "REJECTED",
            AuditStatus::Approved => "APPROVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AuditStatus::Pending),
            "IN_REVIEW" => Some(AuditStatus::InReview),
            "REJECTED" => Some(AuditStatus::Rejected),
            "APPROVED" => Some(AuditStatus::Approved),
            _ => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, AuditStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Person,
    Organization,
}

/// A tenant-owned message template for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTemplate {
    pub id: i64,
    pub owner_id: i64,
    pub owner_type: OwnerType,
    pub name: String,
    pub description: String,
    pub channel: Channel,
    /// 0 means no published version; the template is unusable for sends.
    pub active_version_id: i64,
    pub ctime: i64,
    pub utime: i64,
    #[serde(default)]
    pub versions: Vec<ChannelTemplateVersion>,
}

impl ChannelTemplate {
    /// A template is publishable only once a version has been activated.
    pub fn has_published(&self) -> bool {
        self.active_version_id != 0
    }

    pub fn active_version(&self) -> Option<&ChannelTemplateVersion> {
        if self.active_version_id == 0 {
            return None;
        }
        self.versions.iter().find(|v| v.id == self.active_version_id)
    }
}

/// One reviewed revision of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTemplateVersion {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    /// Vendor-approved SMS signature / email sender.
    pub signature: String,
    pub content: String,
    pub remark: String,
    pub audit_status: AuditStatus,
    pub ctime: i64,
    pub utime: i64,
    #[serde(default)]
    pub providers: Vec<ChannelTemplateProvider>,
}

/// Association of a template version with one vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTemplateProvider {
    pub id: i64,
    pub template_id: i64,
    pub template_version_id: i64,
    pub provider_id: i64,
    pub provider_name: String,
    pub provider_channel: Channel,
    /// Vendor-side template identifier; populated once the vendor approves.
    pub provider_template_id: String,
    pub audit_status: AuditStatus,
    pub ctime: i64,
    pub utime: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(active: i64) -> ChannelTemplate {
        ChannelTemplate {
            id: 7,
            owner_id: 42,
            owner_type: OwnerType::Organization,
            name: "otp".into(),
            description: "login verification code".into(),
            channel: Channel::Sms,
            active_version_id: active,
            ctime: 0,
            utime: 0,
            versions: vec![ChannelTemplateVersion {
                id: 1,
                template_id: 7,
                name: "v1.0.0".into(),
                signature: "Acme".into(),
                content: "your code is ${code}".into(),
                remark: String::new(),
                audit_status: AuditStatus::Approved,
                ctime: 0,
                utime: 0,
                providers: vec![],
            }],
        }
    }

    #[test]
    fn zero_active_version_means_unpublished() {
        assert!(!template(0).has_published());
        assert!(template(0).active_version().is_none());
        assert!(template(1).has_published());
        assert_eq!(template(1).active_version().map(|v| v.id), Some(1));
    }
}
