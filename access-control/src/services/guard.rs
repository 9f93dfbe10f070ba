//! Guard orchestration.
//!
//! Combines the ability builder, the rule evaluator and the resource policy
//! overlay into a single decision for a list of required rules.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ability::AbilityBuilder;
use super::cache::AbilityCache;
use super::error::AuthzError;
use super::evaluator;
use super::policy::{self, PolicyStore};
use crate::models::{Ability, PolicyDecision, Principal, ResourceContext, ResourcePolicy};

/// One `(action, subject)` pair a route requires.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredRule {
    pub action: String,
    pub subject: String,
    pub field: Option<String>,
    pub context: Option<ResourceContext>,
}

impl RequiredRule {
    pub fn new(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
            field: None,
            context: None,
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_context(mut self, context: ResourceContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Display for RequiredRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    Unauthenticated,
    Forbidden,
    PolicyUnavailable,
}

impl DenialKind {
    fn as_str(&self) -> &'static str {
        match self {
            DenialKind::Unauthenticated => "unauthenticated",
            DenialKind::Forbidden => "forbidden",
            DenialKind::PolicyUnavailable => "policy_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub allowed: bool,
    pub error: Option<String>,
    pub denial: Option<DenialKind>,
    pub failed_rule: Option<RequiredRule>,
}

impl GuardDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            error: None,
            denial: None,
            failed_rule: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            allowed: false,
            error: Some("Authentication required".to_string()),
            denial: Some(DenialKind::Unauthenticated),
            failed_rule: None,
        }
    }

    pub fn forbidden(rule: &RequiredRule) -> Self {
        Self {
            allowed: false,
            error: Some(format!("Cannot {} {}", rule.action, rule.subject)),
            denial: Some(DenialKind::Forbidden),
            failed_rule: Some(rule.clone()),
        }
    }

    pub fn policy_unavailable(rule: &RequiredRule) -> Self {
        Self {
            allowed: false,
            error: Some("Authorization policies unavailable".to_string()),
            denial: Some(DenialKind::PolicyUnavailable),
            failed_rule: Some(rule.clone()),
        }
    }

    fn outcome(&self) -> &'static str {
        self.denial.map(|d| d.as_str()).unwrap_or("allowed")
    }

    pub fn into_result(self) -> Result<(), AuthzError> {
        match self.denial {
            None if self.allowed => Ok(()),
            Some(DenialKind::Unauthenticated) => Err(AuthzError::Unauthenticated),
            Some(DenialKind::PolicyUnavailable) => Err(AuthzError::PolicyStoreUnavailable(
                self.error.unwrap_or_default(),
            )),
            _ => {
                let (action, subject) = self
                    .failed_rule
                    .map(|r| (r.action, r.subject))
                    .unwrap_or_default();
                Err(AuthzError::Forbidden { action, subject })
            }
        }
    }
}

/// What to do when the policy store cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyFailureMode {
    /// Keep the role-based decision.
    #[default]
    Abstain,
    /// Deny the request.
    Deny,
}

impl std::str::FromStr for PolicyFailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abstain" => Ok(PolicyFailureMode::Abstain),
            "deny" => Ok(PolicyFailureMode::Deny),
            _ => Err(format!("Invalid policy failure mode: {}", s)),
        }
    }
}

#[derive(Clone, Default)]
pub struct Guard {
    builder: AbilityBuilder,
    cache: Option<AbilityCache>,
    policies: Option<Arc<dyn PolicyStore>>,
    failure_mode: PolicyFailureMode,
}

impl Guard {
    pub fn new(builder: AbilityBuilder) -> Self {
        Self {
            builder,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: AbilityCache) -> Self {
        self.cache = cache.is_enabled().then_some(cache);
        self
    }

    pub fn with_policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    pub fn with_failure_mode(mut self, mode: PolicyFailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn cache(&self) -> Option<&AbilityCache> {
        self.cache.as_ref()
    }

    pub fn ability_for(&self, principal: &Principal) -> Arc<Ability> {
        match &self.cache {
            Some(cache) => cache.get_or_build(principal, |p| self.builder.build(p)),
            None => Arc::new(self.builder.build(principal)),
        }
    }

    /// Role-only check: every required rule must pass.
    pub fn check(&self, required: &[RequiredRule], principal: Option<&Principal>) -> GuardDecision {
        let decision = match principal {
            None => GuardDecision::unauthenticated(),
            Some(principal) => check_ability(&self.ability_for(principal), required),
        };
        record(&decision, principal);
        decision
    }

    /// Role check followed by the resource policy overlay.
    ///
    /// Policies are only read when the role check allows, once per distinct
    /// subject.
    pub async fn check_with_policies(
        &self,
        required: &[RequiredRule],
        principal: Option<&Principal>,
    ) -> GuardDecision {
        let Some(principal) = principal else {
            let decision = GuardDecision::unauthenticated();
            record(&decision, None);
            return decision;
        };

        let decision = check_ability(&self.ability_for(principal), required);
        let decision = match (&self.policies, decision.allowed) {
            (Some(store), true) => self.apply_policies(store.as_ref(), required, principal).await,
            _ => decision,
        };
        record(&decision, Some(principal));
        decision
    }

    async fn apply_policies(
        &self,
        store: &dyn PolicyStore,
        required: &[RequiredRule],
        principal: &Principal,
    ) -> GuardDecision {
        let mut fetched: HashMap<&str, Option<Vec<ResourcePolicy>>> = HashMap::new();

        for rule in required {
            if !fetched.contains_key(rule.subject.as_str()) {
                let policies = match store
                    .active_policies(&rule.subject, principal.tenant_id.as_deref())
                    .await
                {
                    Ok(policies) => Some(policies),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            resource = %rule.subject,
                            user_id = %principal.id,
                            failure_mode = ?self.failure_mode,
                            "Policy store unavailable, resource policies not applied"
                        );
                        metrics::counter!("authz_policy_store_errors_total").increment(1);
                        if self.failure_mode == PolicyFailureMode::Deny {
                            return GuardDecision::policy_unavailable(rule);
                        }
                        None
                    }
                };
                fetched.insert(rule.subject.as_str(), policies);
            }

            let Some(Some(policies)) = fetched.get(rule.subject.as_str()) else {
                continue;
            };
            let outcome = policy::decide(
                policies.clone(),
                &rule.subject,
                &rule.action,
                principal,
                rule.context.as_ref(),
            );
            if outcome == PolicyDecision::Deny {
                return GuardDecision::forbidden(rule);
            }
        }

        GuardDecision::allow()
    }
}

fn check_ability(ability: &Ability, required: &[RequiredRule]) -> GuardDecision {
    let failed = required.iter().find(|rule| {
        !evaluator::can(
            ability,
            &rule.action,
            &rule.subject,
            rule.field.as_deref(),
            rule.context.as_ref(),
        )
    });
    match failed {
        Some(rule) => GuardDecision::forbidden(rule),
        None => GuardDecision::allow(),
    }
}

fn record(decision: &GuardDecision, principal: Option<&Principal>) {
    metrics::counter!("authz_decisions_total", "outcome" => decision.outcome()).increment(1);
    if !decision.allowed {
        tracing::info!(
            user_id = principal.map(|p| p.id.as_str()).unwrap_or("anonymous"),
            tenant_id = ?principal.and_then(|p| p.tenant_id.as_deref()),
            outcome = decision.outcome(),
            rule = ?decision.failed_rule.as_ref().map(ToString::to_string),
            "Authorization denied"
        );
    }
}

/// Role-only check with the built-in role templates.
pub fn casl_guard(required: &[RequiredRule], principal: Option<&Principal>) -> GuardDecision {
    Guard::default().check(required, principal)
}

/// Role check plus resource policies from `store`, with the built-in role
/// templates.
pub async fn casl_guard_with_policies(
    store: Arc<dyn PolicyStore>,
    required: &[RequiredRule],
    principal: Option<&Principal>,
) -> GuardDecision {
    Guard::default()
        .with_policy_store(store)
        .check_with_policies(required, principal)
        .await
}
