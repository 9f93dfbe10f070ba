use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use std::convert::Infallible;

use crate::models::Principal;
use crate::services::JwtService;

/// Verifies session tokens taken from the request.
#[derive(Clone)]
pub struct SessionVerifier {
    pub jwt: JwtService,
    pub cookie_name: String,
}

impl SessionVerifier {
    pub fn new(jwt: JwtService, cookie_name: impl Into<String>) -> Self {
        Self {
            jwt,
            cookie_name: cookie_name.into(),
        }
    }

    pub fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        let token = extract_session_token(headers, &self.cookie_name)?;
        self.jwt.principal_from_token(&token)
    }
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Attach the session principal to the request when the token verifies.
///
/// Never rejects: unauthenticated requests continue without a principal and
/// are turned away by the route guard where a route requires one.
pub async fn session_middleware(
    State(verifier): State<SessionVerifier>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(principal) = verifier.principal(req.headers()) {
        tracing::debug!(
            user_id = %principal.id,
            tenant_id = ?principal.tenant_id,
            roles = ?principal.roles,
            "Session principal attached"
        );
        req.extensions_mut().insert(principal);
    }
    next.run(req).await
}

/// The session principal, if any.
pub struct CurrentPrincipal(pub Option<Principal>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentPrincipal(parts.extensions.get::<Principal>().cloned()))
    }
}

/// The session principal; rejects with 401 when there is none.
pub struct AuthenticatedPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))?;
        Ok(AuthenticatedPrincipal(principal))
    }
}
