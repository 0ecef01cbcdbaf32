//! Per-request tenant context, derived from the bearer token.

/// Tenant context for a request.
///
/// Immutable and present on every authenticated route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BizContext {
    biz_id: i64,
}

impl BizContext {
    pub fn new(biz_id: i64) -> Self {
        Self { biz_id }
    }

    pub fn biz_id(&self) -> i64 {
        self.biz_id
    }
}
