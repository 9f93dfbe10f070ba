//! Services layer for access-control.
//!
//! Ability building, rule evaluation, the resource policy overlay and the
//! guard that ties them together.

pub mod ability;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod evaluator;
pub mod guard;
pub mod jwt;
pub mod policy;

pub use ability::{build_ability, AbilityBuilder, RoleTemplates, RuleTemplate, TemplateValue};
pub use cache::{AbilityCache, AbilityKey};
pub use catalog::{
    load_role_templates, CatalogError, InMemoryRoleCatalog, PgRoleCatalog, RoleCatalog,
};
pub use error::AuthzError;
pub use evaluator::{can, cannot, permitted_fields, relevant_rule};
pub use guard::{
    casl_guard, casl_guard_with_policies, DenialKind, Guard, GuardDecision, PolicyFailureMode,
    RequiredRule,
};
pub use jwt::JwtService;
pub use policy::{
    evaluate_policies, InMemoryPolicyStore, PgPolicyStore, PolicyStore, PolicyStoreError,
};
