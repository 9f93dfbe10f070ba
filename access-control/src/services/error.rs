use service_core::error::AppError;
use thiserror::Error;

use super::catalog::CatalogError;
use super::policy::PolicyStoreError;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Cannot {action} {subject}")]
    Forbidden { action: String, subject: String },

    #[error("Policy store unavailable: {0}")]
    PolicyStoreUnavailable(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Role catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl AuthzError {
    pub fn forbidden(action: impl Into<String>, subject: impl Into<String>) -> Self {
        AuthzError::Forbidden {
            action: action.into(),
            subject: subject.into(),
        }
    }
}

impl From<PolicyStoreError> for AuthzError {
    fn from(err: PolicyStoreError) -> Self {
        AuthzError::PolicyStoreUnavailable(err.to_string())
    }
}

impl From<CatalogError> for AuthzError {
    fn from(err: CatalogError) -> Self {
        AuthzError::Catalog(err.to_string())
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            e @ AuthzError::Forbidden { .. } => AppError::Forbidden(anyhow::anyhow!(e.to_string())),
            AuthzError::PolicyStoreUnavailable(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            AuthzError::InvalidToken(e) => AppError::InvalidToken(e),
            AuthzError::Catalog(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            AuthzError::Config(e) => AppError::ConfigError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let status = |e: AuthzError| AppError::from(e).status_code();
        assert_eq!(status(AuthzError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(AuthzError::forbidden("delete", "User")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(AuthzError::PolicyStoreUnavailable("pool timed out".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_forbidden_names_the_pair() {
        let err = AuthzError::forbidden("delete", "User");
        assert_eq!(err.to_string(), "Cannot delete User");
    }
}
