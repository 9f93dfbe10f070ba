//! Capability rules and the ability set built from them.

use serde::{Deserialize, Serialize};

use super::condition::{Conditions, ResourceContext};

/// Action names used by the built-in role templates.
pub mod actions {
    /// Wildcard action: matches every action.
    pub const MANAGE: &str = "manage";
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// Subject names used by the built-in role templates.
pub mod subjects {
    /// Wildcard subject: matches every subject.
    pub const ALL: &str = "all";
    pub const LESSON: &str = "Lesson";
    pub const STORY: &str = "Story";
    pub const QUIZ: &str = "Quiz";
    pub const EXERCISE: &str = "Exercise";
    pub const QUIZ_ATTEMPT: &str = "QuizAttempt";
    pub const PROGRESS: &str = "Progress";
    pub const USER: &str = "User";
}

/// One grant (`inverted = false`) or explicit denial (`inverted = true`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRule {
    pub action: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityRule {
    pub fn can(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
            fields: None,
            conditions: None,
            inverted: false,
            reason: None,
        }
    }

    pub fn cannot(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            inverted: true,
            ..Self::can(action, subject)
        }
    }

    pub fn with_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = if conditions.is_empty() {
            None
        } else {
            Some(conditions)
        };
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// `manage all` with no fields and no conditions.
    pub fn is_unrestricted_grant(&self) -> bool {
        !self.inverted
            && self.action == actions::MANAGE
            && self.subject == subjects::ALL
            && self.fields.is_none()
            && self.conditions.is_none()
    }

    pub fn matches_action(&self, action: &str) -> bool {
        self.action == actions::MANAGE || self.action == action
    }

    pub fn matches_subject(&self, subject: &str) -> bool {
        self.subject == subjects::ALL || self.subject == subject
    }

    /// Without a context only the subject type is known: a conditional grant
    /// applies, a conditional denial does not.
    pub fn matches_conditions(&self, context: Option<&ResourceContext>) -> bool {
        match (&self.conditions, context) {
            (None, _) => true,
            (Some(_), None) => !self.inverted,
            (Some(conditions), Some(context)) => conditions.matches(context),
        }
    }

    /// A rule without a field list covers every field. When no field is
    /// requested, a field-restricted grant applies and a field-restricted
    /// denial does not.
    pub fn matches_field(&self, field: Option<&str>) -> bool {
        match (&self.fields, field) {
            (None, _) => true,
            (Some(_), None) => !self.inverted,
            (Some(fields), Some(field)) => fields.iter().any(|f| f == field),
        }
    }
}

/// Ordered, immutable set of rules for one principal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ability {
    rules: Vec<CapabilityRule>,
}

impl Ability {
    pub fn new(rules: Vec<CapabilityRule>) -> Self {
        Self { rules }
    }

    /// An ability with no rules denies everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[CapabilityRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        let rule = CapabilityRule::can(actions::MANAGE, subjects::ALL);
        assert!(rule.matches_action("publish"));
        assert!(rule.matches_subject("Certificate"));

        let rule = CapabilityRule::can(actions::READ, subjects::LESSON);
        assert!(!rule.matches_action(actions::UPDATE));
        assert!(!rule.matches_subject(subjects::STORY));
        // The wildcard only works in the rule, not in the request.
        assert!(!rule.matches_action(actions::MANAGE));
    }

    #[test]
    fn test_conditions_without_context() {
        let conditions = Conditions::eq("createdBy", "u1");
        let grant = CapabilityRule::can(actions::UPDATE, subjects::STORY)
            .with_conditions(conditions.clone());
        let denial =
            CapabilityRule::cannot(actions::UPDATE, subjects::STORY).with_conditions(conditions);

        assert!(grant.matches_conditions(None));
        assert!(!denial.matches_conditions(None));

        let ctx = ResourceContext::new().with("createdBy", "u2");
        assert!(!grant.matches_conditions(Some(&ctx)));
    }

    #[test]
    fn test_fields() {
        let grant = CapabilityRule::can(actions::UPDATE, subjects::USER)
            .with_fields(["displayName", "avatarUrl"]);
        assert!(grant.matches_field(None));
        assert!(grant.matches_field(Some("displayName")));
        assert!(!grant.matches_field(Some("email")));

        let denial = CapabilityRule::cannot(actions::UPDATE, subjects::USER).with_fields(["role"]);
        assert!(!denial.matches_field(None));
        assert!(denial.matches_field(Some("role")));

        let unrestricted = CapabilityRule::can(actions::READ, subjects::LESSON);
        assert!(unrestricted.matches_field(Some("anything")));
    }

    #[test]
    fn test_empty_conditions_are_dropped() {
        let rule = CapabilityRule::can(actions::READ, subjects::LESSON)
            .with_conditions(Conditions::new());
        assert!(rule.conditions.is_none());
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: CapabilityRule = serde_json::from_value(serde_json::json!({
            "action": "read",
            "subject": "Story",
            "inverted": true,
            "conditions": {"tenantId": "other"}
        }))
        .unwrap();
        assert!(rule.inverted);
        assert_eq!(rule.conditions, Some(Conditions::eq("tenantId", "other")));
        assert!(rule.fields.is_none());
    }
}
