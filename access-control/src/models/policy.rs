//! Resource policy model - tenant-scoped ABAC overlay records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::condition::{ConditionError, Conditions, ResourceContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
        }
    }
}

impl std::str::FromStr for PolicyEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(PolicyEffect::Allow),
            "deny" => Ok(PolicyEffect::Deny),
            _ => Err(format!("Invalid policy effect: {}", s)),
        }
    }
}

/// Outcome of evaluating the policy overlay for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
    /// No policy matched; the role-based decision stands.
    Abstain,
}

impl From<PolicyEffect> for PolicyDecision {
    fn from(effect: PolicyEffect) -> Self {
        match effect {
            PolicyEffect::Allow => PolicyDecision::Allow,
            PolicyEffect::Deny => PolicyDecision::Deny,
        }
    }
}

/// Resource policy entity.
///
/// `tenant_id = None` makes the policy global. An empty `actions` list applies
/// the policy to every action on `resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicy {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub tenant_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ResourcePolicy {
    /// Create a new active, global policy with no conditions.
    pub fn new(name: impl Into<String>, resource: impl Into<String>, effect: PolicyEffect) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            resource: resource.into(),
            effect,
            conditions: Conditions::new(),
            actions: Vec::new(),
            priority: 0,
            tenant_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn for_actions<I, A>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Global policies are visible to everyone; tenant policies only to
    /// principals of that tenant.
    pub fn visible_to(&self, tenant_id: Option<&str>) -> bool {
        match &self.tenant_id {
            None => true,
            Some(owner) => tenant_id == Some(owner.as_str()),
        }
    }

    pub fn applies_to_action(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|a| a == action)
    }

    /// Unconditional policies always match. Conditional policies need a
    /// context to match against.
    pub fn matches(&self, context: Option<&ResourceContext>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        context.is_some_and(|ctx| self.conditions.matches(ctx))
    }
}

/// Raw `resource_policies` row.
#[derive(Debug, Clone, FromRow)]
pub struct ResourcePolicyRow {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub effect: String,
    pub conditions: serde_json::Value,
    pub actions: Vec<String>,
    pub priority: i32,
    pub tenant_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a stored policy row could not be used.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PolicyRowError {
    #[error("{0}")]
    Effect(String),

    #[error(transparent)]
    Conditions(#[from] ConditionError),
}

impl TryFrom<ResourcePolicyRow> for ResourcePolicy {
    type Error = PolicyRowError;

    fn try_from(row: ResourcePolicyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            effect: row.effect.parse().map_err(PolicyRowError::Effect)?,
            conditions: Conditions::from_json(&row.conditions)?,
            id: row.id,
            name: row.name,
            resource: row.resource,
            actions: row.actions,
            priority: row.priority,
            tenant_id: row.tenant_id,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(effect: &str, conditions: serde_json::Value) -> ResourcePolicyRow {
        ResourcePolicyRow {
            id: Uuid::new_v4(),
            name: "archived stories are read-only".to_string(),
            resource: "Story".to_string(),
            effect: effect.to_string(),
            conditions,
            actions: vec!["update".to_string()],
            priority: 10,
            tenant_id: Some("t1".to_string()),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let policy = ResourcePolicy::try_from(row("DENY", json!({"status": "archived"}))).unwrap();
        assert_eq!(policy.effect, PolicyEffect::Deny);
        assert_eq!(policy.conditions, Conditions::eq("status", "archived"));
        assert_eq!(policy.priority, 10);
    }

    #[test]
    fn test_row_with_bad_effect() {
        let err = ResourcePolicy::try_from(row("maybe", json!({}))).unwrap_err();
        assert!(matches!(err, PolicyRowError::Effect(_)));
    }

    #[test]
    fn test_row_with_bad_conditions() {
        let err = ResourcePolicy::try_from(row("deny", json!({"status": {"$regex": "^a"}})))
            .unwrap_err();
        assert!(matches!(err, PolicyRowError::Conditions(_)));
    }

    #[test]
    fn test_visibility() {
        let global = ResourcePolicy::new("global", "Story", PolicyEffect::Deny);
        assert!(global.visible_to(None));
        assert!(global.visible_to(Some("t2")));

        let scoped = global.clone().for_tenant("t1");
        assert!(scoped.visible_to(Some("t1")));
        assert!(!scoped.visible_to(Some("t2")));
        assert!(!scoped.visible_to(None));
    }

    #[test]
    fn test_actions_filter() {
        let policy = ResourcePolicy::new("p", "Story", PolicyEffect::Deny);
        assert!(policy.applies_to_action("delete"));

        let policy = policy.for_actions(["update"]);
        assert!(policy.applies_to_action("update"));
        assert!(!policy.applies_to_action("read"));
    }

    #[test]
    fn test_conditional_policy_needs_context() {
        let policy = ResourcePolicy::new("p", "Story", PolicyEffect::Deny)
            .with_conditions(Conditions::eq("status", "archived"));
        assert!(!policy.matches(None));
        assert!(policy.matches(Some(&ResourceContext::new().with("status", "archived"))));
        assert!(ResourcePolicy::new("p", "Story", PolicyEffect::Deny).matches(None));
    }
}
