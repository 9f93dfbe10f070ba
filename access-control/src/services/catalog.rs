//! Role/permission catalog loader.
//!
//! Turns persisted `roles`, `permissions` and `role_permissions` rows into
//! [`RoleTemplates`] the ability builder can consume.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;

use super::ability::{RoleTemplates, RuleTemplate, OWNER_FIELD};
use crate::models::{subjects, CatalogGrant, TenantScope};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RoleCatalog: Send + Sync {
    /// Every role/permission pairing, in a stable order.
    async fn grants(&self) -> Result<Vec<CatalogGrant>, CatalogError>;
}

#[derive(Clone)]
pub struct PgRoleCatalog {
    pool: PgPool,
}

impl PgRoleCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleCatalog for PgRoleCatalog {
    async fn grants(&self) -> Result<Vec<CatalogGrant>, CatalogError> {
        let grants = sqlx::query_as::<_, CatalogGrant>(
            r#"
            SELECT r.slug AS role_slug, r.tenant_scope, p.slug AS permission_slug,
                   p.resource, p.action, rp.tenant_id
            FROM role_permissions rp
            JOIN roles r ON r.id = rp.role_id
            JOIN permissions p ON p.id = rp.permission_id
            ORDER BY r.slug, p.slug, rp.tenant_id NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }
}

/// Fixed catalog, for tests and static deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoleCatalog {
    grants: Vec<CatalogGrant>,
}

impl InMemoryRoleCatalog {
    pub fn new(grants: Vec<CatalogGrant>) -> Self {
        Self { grants }
    }
}

#[async_trait]
impl RoleCatalog for InMemoryRoleCatalog {
    async fn grants(&self) -> Result<Vec<CatalogGrant>, CatalogError> {
        Ok(self.grants.clone())
    }
}

/// Rule template for a single grant.
///
/// `:own` permissions are limited to records the principal created.
/// Tenant-scoped roles confine every subject but `all` to the principal's
/// tenant.
pub fn template_for(grant: &CatalogGrant) -> RuleTemplate {
    let mut template = RuleTemplate::can(grant.action.as_str(), grant.resource.as_str());
    if grant.is_own_scope() {
        template = template.owned_by(OWNER_FIELD);
    }
    if grant.scope() == TenantScope::Tenant && grant.resource != subjects::ALL {
        template = template.tenant_scoped();
    }
    if let Some(tenant_id) = &grant.tenant_id {
        template = template.only_for_tenant(tenant_id.as_str());
    }
    template
}

pub fn templates_from_grants(grants: &[CatalogGrant]) -> RoleTemplates {
    let mut templates = RoleTemplates::empty();
    for grant in grants {
        templates.append(&grant.role_slug, vec![template_for(grant)]);
    }
    templates
}

/// Load role templates from the catalog.
pub async fn load_role_templates(catalog: &dyn RoleCatalog) -> Result<RoleTemplates, CatalogError> {
    let grants = catalog.grants().await?;
    let templates = templates_from_grants(&grants);
    tracing::info!(
        grants = grants.len(),
        roles = templates.role_slugs().count(),
        "Loaded role catalog"
    );
    Ok(templates)
}
