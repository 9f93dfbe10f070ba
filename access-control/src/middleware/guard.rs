use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::sync::Arc;

use crate::models::Principal;
use crate::services::{Guard, RequiredRule};

/// A fixed list of rules guarding a group of routes.
#[derive(Clone)]
pub struct RouteGuard {
    guard: Guard,
    required: Arc<[RequiredRule]>,
    with_policies: bool,
}

impl RouteGuard {
    /// Role rules followed by resource policies.
    pub fn new(guard: Guard, required: Vec<RequiredRule>) -> Self {
        Self {
            guard,
            required: required.into(),
            with_policies: true,
        }
    }

    /// Role rules only; the policy store is never read.
    pub fn role_only(guard: Guard, required: Vec<RequiredRule>) -> Self {
        Self {
            with_policies: false,
            ..Self::new(guard, required)
        }
    }
}

/// Middleware to require the route's rules.
///
/// Expects [`session_middleware`](super::session_middleware) to run first.
pub async fn route_guard_middleware(
    State(route): State<RouteGuard>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req.extensions().get::<Principal>().cloned();
    let decision = if route.with_policies {
        route
            .guard
            .check_with_policies(&route.required, principal.as_ref())
            .await
    } else {
        route.guard.check(&route.required, principal.as_ref())
    };

    decision.into_result()?;
    Ok(next.run(req).await)
}

/// Check rules that depend on the loaded record from inside a handler.
pub async fn authorize(
    guard: &Guard,
    principal: Option<&Principal>,
    required: &[RequiredRule],
) -> Result<(), AppError> {
    guard
        .check_with_policies(required, principal)
        .await
        .into_result()
        .map_err(AppError::from)
}
