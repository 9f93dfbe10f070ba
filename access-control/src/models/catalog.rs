//! Role and permission catalog - persisted role-to-permission mappings.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether rules derived from a role are confined to the principal's tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantScope {
    Global,
    Tenant,
}

impl TenantScope {
    /// Unrecognized codes fall back to `Tenant`, the narrower scope.
    pub fn from_code(code: &str) -> Self {
        if code.eq_ignore_ascii_case("global") {
            TenantScope::Global
        } else {
            TenantScope::Tenant
        }
    }
}

/// Role entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub tenant_scope: String,
    pub is_system: bool,
}

impl Role {
    pub fn scope(&self) -> TenantScope {
        TenantScope::from_code(&self.tenant_scope)
    }
}

/// Permission entity.
///
/// Slug format: `{resource}:{action}[:scope]`, e.g. `story:update:own`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub resource: String,
    pub action: String,
    pub is_system: bool,
}

impl Permission {
    pub fn is_own_scope(&self) -> bool {
        is_own_scope(&self.slug)
    }
}

fn is_own_scope(slug: &str) -> bool {
    slug.split(':').nth(2) == Some("own")
}

/// Role permission mapping. A `tenant_id` restricts the grant to one tenant.
#[derive(Debug, Clone, FromRow)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub tenant_id: Option<String>,
}

/// One row of the role/permission join, as read by the catalog loader.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CatalogGrant {
    pub role_slug: String,
    pub tenant_scope: String,
    pub permission_slug: String,
    pub resource: String,
    pub action: String,
    pub tenant_id: Option<String>,
}

impl CatalogGrant {
    pub fn scope(&self) -> TenantScope {
        TenantScope::from_code(&self.tenant_scope)
    }

    pub fn is_own_scope(&self) -> bool {
        is_own_scope(&self.permission_slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_scope_from_slug() {
        let permission = Permission {
            id: Uuid::new_v4(),
            name: "Edit own stories".to_string(),
            slug: "story:update:own".to_string(),
            resource: "Story".to_string(),
            action: "update".to_string(),
            is_system: true,
        };
        assert!(permission.is_own_scope());

        let permission = Permission {
            slug: "story:read".to_string(),
            ..permission
        };
        assert!(!permission.is_own_scope());
    }

    #[test]
    fn test_tenant_scope_codes() {
        assert_eq!(TenantScope::from_code("GLOBAL"), TenantScope::Global);
        assert_eq!(TenantScope::from_code("tenant"), TenantScope::Tenant);
        assert_eq!(TenantScope::from_code("org"), TenantScope::Tenant);
    }
}
