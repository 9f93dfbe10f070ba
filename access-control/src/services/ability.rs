//! Ability builder.
//!
//! Maps a principal's roles onto capability rules through a data-driven
//! table of role templates. New roles are added as table entries; the builder
//! itself never branches on role names.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    actions, subjects, Ability, CapabilityRule, Conditions, MatchExpression, Principal,
};

/// Context field holding the owning tenant of a record.
pub const TENANT_FIELD: &str = "tenantId";
/// Context field holding the author of a record.
pub const OWNER_FIELD: &str = "createdBy";

/// Value placed in a template condition, resolved per principal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Literal(Value),
    PrincipalId,
    PrincipalTenant,
}

impl TemplateValue {
    fn resolve(&self, principal: &Principal) -> Value {
        match self {
            TemplateValue::Literal(value) => value.clone(),
            TemplateValue::PrincipalId => Value::String(principal.id.clone()),
            TemplateValue::PrincipalTenant => principal
                .tenant_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

/// A capability rule with placeholders, stored per role.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTemplate {
    pub action: String,
    pub subject: String,
    pub fields: Option<Vec<String>>,
    pub conditions: Vec<(String, TemplateValue)>,
    pub inverted: bool,
    /// Adds `tenantId = principal.tenant_id` when the principal has a tenant.
    pub tenant_scoped: bool,
    /// Only emitted for principals of this tenant.
    pub only_tenant: Option<String>,
    pub reason: Option<String>,
}

impl RuleTemplate {
    pub fn can(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
            fields: None,
            conditions: Vec::new(),
            inverted: false,
            tenant_scoped: false,
            only_tenant: None,
            reason: None,
        }
    }

    pub fn cannot(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            inverted: true,
            ..Self::can(action, subject)
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn when(mut self, field: impl Into<String>, value: TemplateValue) -> Self {
        self.conditions.push((field.into(), value));
        self
    }

    /// Restrict to records whose `field` equals the principal's id.
    pub fn owned_by(self, field: &str) -> Self {
        self.when(field, TemplateValue::PrincipalId)
    }

    pub fn tenant_scoped(mut self) -> Self {
        self.tenant_scoped = true;
        self
    }

    pub fn only_for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.only_tenant = Some(tenant_id.into());
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Resolve placeholders for `principal`. Returns `None` when the template
    /// is restricted to a different tenant.
    pub fn instantiate(&self, principal: &Principal) -> Option<CapabilityRule> {
        if let Some(only) = &self.only_tenant {
            if principal.tenant_id.as_deref() != Some(only.as_str()) {
                return None;
            }
        }

        let mut conditions = Conditions::new();
        for (field, value) in &self.conditions {
            conditions = conditions.with(
                field.clone(),
                MatchExpression::Eq(value.resolve(principal)),
            );
        }
        if self.tenant_scoped {
            if let Some(tenant_id) = &principal.tenant_id {
                conditions = conditions.with(
                    TENANT_FIELD,
                    MatchExpression::Eq(Value::String(tenant_id.clone())),
                );
            }
        }

        let mut rule = CapabilityRule {
            action: self.action.clone(),
            subject: self.subject.clone(),
            fields: self.fields.clone(),
            conditions: None,
            inverted: self.inverted,
            reason: self.reason.clone(),
        }
        .with_conditions(conditions);
        if rule.fields.as_ref().is_some_and(Vec::is_empty) {
            rule.fields = None;
        }
        Some(rule)
    }
}

/// Table from role slug to the rule templates it grants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleTemplates {
    roles: HashMap<String, Vec<RuleTemplate>>,
}

impl RoleTemplates {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The platform's built-in roles: `admin`, `coach` and `student`.
    pub fn builtin() -> Self {
        BUILTIN_TEMPLATES.clone()
    }

    pub fn with_role(mut self, slug: &str, templates: Vec<RuleTemplate>) -> Self {
        self.insert(slug, templates);
        self
    }

    /// Replace the templates of `slug`.
    pub fn insert(&mut self, slug: &str, templates: Vec<RuleTemplate>) {
        self.roles.insert(slug.to_ascii_lowercase(), templates);
    }

    /// Append templates to `slug`, keeping the existing ones first.
    pub fn append(&mut self, slug: &str, templates: Vec<RuleTemplate>) {
        self.roles
            .entry(slug.to_ascii_lowercase())
            .or_default()
            .extend(templates);
    }

    /// Merge another table into this one; roles present in both are appended.
    pub fn merge(mut self, other: RoleTemplates) -> Self {
        for (slug, templates) in other.roles {
            self.append(&slug, templates);
        }
        self
    }

    pub fn get(&self, slug: &str) -> Option<&[RuleTemplate]> {
        self.roles.get(slug).map(Vec::as_slice)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.roles.contains_key(slug)
    }

    pub fn role_slugs(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}

static BUILTIN_TEMPLATES: Lazy<RoleTemplates> = Lazy::new(|| {
    let content = [
        subjects::LESSON,
        subjects::STORY,
        subjects::QUIZ,
        subjects::EXERCISE,
    ];

    let mut coach = Vec::new();
    for subject in content {
        coach.push(RuleTemplate::can(actions::READ, subject).tenant_scoped());
    }
    for action in [actions::CREATE, actions::UPDATE, actions::DELETE] {
        for subject in content {
            coach.push(
                RuleTemplate::can(action, subject)
                    .owned_by(OWNER_FIELD)
                    .tenant_scoped(),
            );
        }
    }
    coach.push(
        RuleTemplate::cannot(actions::MANAGE, subjects::USER)
            .because("User management is reserved to administrators"),
    );
    coach.push(
        RuleTemplate::can(actions::UPDATE, subjects::USER)
            .fields(&["displayName", "avatarUrl", "bio"])
            .owned_by("id"),
    );

    let mut student = Vec::new();
    for subject in content {
        student.push(RuleTemplate::can(actions::READ, subject).tenant_scoped());
    }
    for subject in [subjects::QUIZ_ATTEMPT, subjects::PROGRESS] {
        for action in [actions::CREATE, actions::READ] {
            student.push(
                RuleTemplate::can(action, subject)
                    .owned_by("userId")
                    .tenant_scoped(),
            );
        }
    }
    student.push(
        RuleTemplate::cannot(actions::MANAGE, subjects::USER)
            .because("User management is reserved to administrators"),
    );
    student.push(
        RuleTemplate::can(actions::UPDATE, subjects::USER)
            .fields(&["displayName", "avatarUrl"])
            .owned_by("id"),
    );

    RoleTemplates::empty()
        .with_role(
            "admin",
            vec![RuleTemplate::can(actions::MANAGE, subjects::ALL)],
        )
        .with_role("coach", coach)
        .with_role("student", student)
});

/// Builds abilities from a role template table.
#[derive(Debug, Clone)]
pub struct AbilityBuilder {
    templates: Arc<RoleTemplates>,
}

impl Default for AbilityBuilder {
    fn default() -> Self {
        Self::new(RoleTemplates::builtin())
    }
}

impl AbilityBuilder {
    pub fn new(templates: RoleTemplates) -> Self {
        Self {
            templates: Arc::new(templates),
        }
    }

    pub fn templates(&self) -> &RoleTemplates {
        &self.templates
    }

    /// Build the ability for `principal`. Unknown roles contribute nothing,
    /// so a principal without a recognized role gets an empty ability.
    ///
    /// Roles holding an unrestricted `manage all` grant are appended after
    /// every other role, so denials from a lesser role never shadow them.
    pub fn build(&self, principal: &Principal) -> Ability {
        let mut rules = Vec::new();
        let mut unrestricted = Vec::new();
        for role in &principal.roles {
            match self.templates.get(role) {
                Some(templates) => {
                    let role_rules: Vec<CapabilityRule> = templates
                        .iter()
                        .filter_map(|t| t.instantiate(principal))
                        .collect();
                    if role_rules.iter().any(CapabilityRule::is_unrestricted_grant) {
                        unrestricted.extend(role_rules);
                    } else {
                        rules.extend(role_rules);
                    }
                }
                None => {
                    tracing::debug!(
                        user_id = %principal.id,
                        role = %role,
                        "No rule template for role"
                    );
                }
            }
        }
        rules.extend(unrestricted);
        Ability::new(rules)
    }

    /// Use `explicit_rules` verbatim when given, otherwise build from roles.
    pub fn build_with(
        &self,
        explicit_rules: Option<Vec<CapabilityRule>>,
        principal: &Principal,
    ) -> Ability {
        match explicit_rules {
            Some(rules) => Ability::new(rules),
            None => self.build(principal),
        }
    }
}

static DEFAULT_BUILDER: Lazy<AbilityBuilder> = Lazy::new(AbilityBuilder::default);

/// Build an ability with the built-in role templates.
pub fn build_ability(explicit_rules: Option<Vec<CapabilityRule>>, principal: &Principal) -> Ability {
    DEFAULT_BUILDER.build_with(explicit_rules, principal)
}
