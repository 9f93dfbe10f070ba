//! Rule evaluation: last matching rule wins, no match denies.

use crate::models::{Ability, CapabilityRule, ResourceContext};

/// The rule that decides `action` on `subject`, if any.
pub fn relevant_rule<'a>(
    ability: &'a Ability,
    action: &str,
    subject: &str,
    field: Option<&str>,
    context: Option<&ResourceContext>,
) -> Option<&'a CapabilityRule> {
    ability.rules().iter().rev().find(|rule| {
        rule.matches_subject(subject)
            && rule.matches_action(action)
            && rule.matches_conditions(context)
            && rule.matches_field(field)
    })
}

pub fn can(
    ability: &Ability,
    action: &str,
    subject: &str,
    field: Option<&str>,
    context: Option<&ResourceContext>,
) -> bool {
    relevant_rule(ability, action, subject, field, context).is_some_and(|rule| !rule.inverted)
}

pub fn cannot(
    ability: &Ability,
    action: &str,
    subject: &str,
    field: Option<&str>,
    context: Option<&ResourceContext>,
) -> bool {
    !can(ability, action, subject, field, context)
}

/// Fields of `subject` the ability permits for `action`, out of `candidates`.
pub fn permitted_fields<'f>(
    ability: &Ability,
    action: &str,
    subject: &str,
    candidates: &[&'f str],
    context: Option<&ResourceContext>,
) -> Vec<&'f str> {
    candidates
        .iter()
        .copied()
        .filter(|field| can(ability, action, subject, Some(field), context))
        .collect()
}

impl Ability {
    /// Type-level check with no field or record.
    pub fn can(&self, action: &str, subject: &str) -> bool {
        can(self, action, subject, None, None)
    }

    pub fn can_on(&self, action: &str, subject: &str, context: &ResourceContext) -> bool {
        can(self, action, subject, None, Some(context))
    }

    pub fn can_field(
        &self,
        action: &str,
        subject: &str,
        field: &str,
        context: Option<&ResourceContext>,
    ) -> bool {
        can(self, action, subject, Some(field), context)
    }
}
