//! Resource policy overlay (ABAC).
//!
//! Policies are read per resource and tenant, ordered by priority and age, and
//! the first one whose conditions match the request context decides. Callers
//! only consult the overlay after role rules have allowed the action, so a
//! policy can narrow a grant but never widen one.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{
    PolicyDecision, Principal, ResourceContext, ResourcePolicy, ResourcePolicyRow,
};

#[derive(Error, Debug)]
pub enum PolicyStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Source of active resource policies.
///
/// Implementations must only return rows that are global or owned by
/// `tenant_id`.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn active_policies(
        &self,
        resource: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ResourcePolicy>, PolicyStoreError>;
}

/// Postgres-backed store reading `resource_policies`.
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn active_policies(
        &self,
        resource: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ResourcePolicy>, PolicyStoreError> {
        let rows = sqlx::query_as::<_, ResourcePolicyRow>(
            r#"
            SELECT id, name, resource, effect, conditions, actions, priority,
                   tenant_id, is_active, created_at
            FROM resource_policies
            WHERE resource = $1
              AND is_active = TRUE
              AND (tenant_id IS NULL OR tenant_id = $2)
            ORDER BY priority DESC, created_at DESC
            "#,
        )
        .bind(resource)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                ResourcePolicy::try_from(row)
                    .map_err(|e| {
                        tracing::warn!(policy_id = %id, error = %e, "Skipping malformed resource policy");
                    })
                    .ok()
            })
            .collect())
    }
}

/// In-process store, used for seeding and tests.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<ResourcePolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new(policies: Vec<ResourcePolicy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    pub async fn insert(&self, policy: ResourcePolicy) {
        self.policies.write().await.push(policy);
    }

    pub async fn clear(&self) {
        self.policies.write().await.clear();
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn active_policies(
        &self,
        resource: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<ResourcePolicy>, PolicyStoreError> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.resource == resource && p.is_active && p.visible_to(tenant_id))
            .cloned()
            .collect())
    }
}

/// Order policies the way they are evaluated: priority desc, then newest first.
pub fn sort_policies(policies: &mut [ResourcePolicy]) {
    policies.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Decide the overlay outcome from an already fetched policy list.
///
/// Rows the store should not have returned (inactive, other resource, other
/// tenant) are dropped again here.
pub fn decide(
    mut policies: Vec<ResourcePolicy>,
    resource: &str,
    action: &str,
    principal: &Principal,
    context: Option<&ResourceContext>,
) -> PolicyDecision {
    let tenant_id = principal.tenant_id.as_deref();
    policies.retain(|p| {
        if !p.visible_to(tenant_id) {
            tracing::warn!(
                policy_id = %p.id,
                policy_tenant = ?p.tenant_id,
                tenant_id = ?tenant_id,
                "Policy store returned a policy from another tenant"
            );
            return false;
        }
        p.is_active && p.resource == resource && p.applies_to_action(action)
    });
    sort_policies(&mut policies);

    match policies.iter().find(|p| p.matches(context)) {
        Some(policy) => {
            tracing::debug!(
                policy_id = %policy.id,
                policy = %policy.name,
                effect = policy.effect.as_str(),
                resource = %resource,
                action = %action,
                "Resource policy matched"
            );
            policy.effect.into()
        }
        None => PolicyDecision::Abstain,
    }
}

/// Fetch and evaluate the policies for one resource.
pub async fn evaluate_policies(
    store: &dyn PolicyStore,
    resource: &str,
    action: &str,
    principal: &Principal,
    context: Option<&ResourceContext>,
) -> Result<PolicyDecision, PolicyStoreError> {
    let policies = store
        .active_policies(resource, principal.tenant_id.as_deref())
        .await?;
    Ok(decide(policies, resource, action, principal, context))
}
