pub mod catalog;
pub mod condition;
pub mod policy;
pub mod principal;
pub mod rule;

pub use catalog::{CatalogGrant, Permission, Role, RolePermission, TenantScope};
pub use condition::{ConditionError, Conditions, MatchExpression, ResourceContext};
pub use policy::{PolicyDecision, PolicyEffect, PolicyRowError, ResourcePolicy, ResourcePolicyRow};
pub use principal::{Principal, SessionClaims};
pub use rule::{actions, subjects, Ability, CapabilityRule};
