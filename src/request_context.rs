//! Per-request context
//!
//! The tenant and acting user are resolved once by middleware and then
//! passed explicitly through services and the store. Nothing reads them
//! from ambient state.

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub request_id: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            request_id: request_id.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// User recorded in audit tags; "anonymous" when unauthenticated.
    pub fn audit_user(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}
