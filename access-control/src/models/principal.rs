//! Authenticated principal and the session claims it is derived from.

use serde::{Deserialize, Serialize};

/// Claims carried by a verified session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Subject (user ID)
    pub user_id: String,
    /// Tenant the user belongs to; absent for platform-level accounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Primary role slug
    pub role: String,
    /// Additional role slugs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// The authenticated actor an authorization decision is made for.
///
/// Lives for one request. Roles are lower-cased, trimmed and deduplicated,
/// with the primary role first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
    pub email: String,
}

impl Principal {
    pub fn new<I, R>(id: impl Into<String>, tenant_id: Option<&str>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        Self {
            id: id.into(),
            tenant_id: normalize_tenant(tenant_id),
            roles: normalize_roles(roles),
            email: String::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Derive a principal from verified claims.
    ///
    /// Returns `None` when the subject is blank, so a malformed token can never
    /// produce an anonymous principal with default rights.
    pub fn from_claims(claims: &SessionClaims) -> Option<Self> {
        if claims.user_id.trim().is_empty() {
            return None;
        }
        let roles = std::iter::once(claims.role.as_str())
            .chain(claims.roles.iter().map(String::as_str));
        Some(
            Self::new(claims.user_id.trim(), claims.tenant_id.as_deref(), roles)
                .with_email(claims.email.clone()),
        )
    }

    pub fn has_role(&self, slug: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(slug))
    }

    /// Principals without a tenant operate at platform level.
    pub fn is_platform_level(&self) -> bool {
        self.tenant_id.is_none()
    }

    pub fn primary_role(&self) -> Option<&str> {
        self.roles.first().map(String::as_str)
    }
}

fn normalize_tenant(tenant_id: Option<&str>) -> Option<String> {
    tenant_id
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn normalize_roles<I, R>(roles: I) -> Vec<String>
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for role in roles {
        let role = role.as_ref().trim().to_ascii_lowercase();
        if !role.is_empty() && !normalized.contains(&role) {
            normalized.push(role);
        }
    }
    normalized
}
