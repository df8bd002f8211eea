use docintel_core::{TenantId, UserId};

/// Caller identity for a request, taken from the `x-tenant-id` and `x-user-id`
/// headers.
///
/// Immutable, and present on every `/documents` and `/quota` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    user_id: UserId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self { tenant_id, user_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}
