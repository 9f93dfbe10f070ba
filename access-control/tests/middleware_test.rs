mod common;

use access_control::middleware::{
    authorize, route_guard_middleware, session_middleware, CurrentPrincipal, RouteGuard,
    SessionVerifier,
};
use access_control::models::{actions, subjects, ResourceContext};
use access_control::services::{Guard, PolicyFailureMode, RequiredRule};
use axum::{
    body::Body,
    extract::Path,
    http::{header, Request, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::{delete, get, put},
    Json, Router,
};
use common::{coach, expired_token_for, failing_guard, jwt, student, token_for, COOKIE_NAME};
use http_body_util::BodyExt;
use service_core::error::AppError;
use tower::util::ServiceExt;

fn verifier() -> SessionVerifier {
    SessionVerifier::new(jwt(), COOKIE_NAME)
}

fn app(guard: Guard) -> Router {
    let lessons = Router::new()
        .route("/lessons", get(|| async { "lessons" }))
        .route_layer(from_fn_with_state(
            RouteGuard::new(
                guard.clone(),
                vec![RequiredRule::new(actions::READ, subjects::LESSON)],
            ),
            route_guard_middleware,
        ));

    let users = Router::new()
        .route("/users/:id", delete(|| async { StatusCode::NO_CONTENT }))
        .route_layer(from_fn_with_state(
            RouteGuard::role_only(
                guard.clone(),
                vec![RequiredRule::new(actions::DELETE, subjects::USER)],
            ),
            route_guard_middleware,
        ));

    let stories = Router::new().route(
        "/stories/:author",
        put(move |Path(author): Path<String>, CurrentPrincipal(principal): CurrentPrincipal| {
            let guard = guard.clone();
            async move {
                let rule = RequiredRule::new(actions::UPDATE, subjects::STORY).with_context(
                    ResourceContext::new()
                        .with("createdBy", author)
                        .with("tenantId", "t1"),
                );
                authorize(&guard, principal.as_ref(), &[rule]).await?;
                Ok::<_, AppError>(StatusCode::OK)
            }
        }),
    );

    let me = Router::new().route(
        "/me",
        get(|CurrentPrincipal(principal): CurrentPrincipal| async move {
            Json(serde_json::json!({ "id": principal.map(|p| p.id) }))
        }),
    );

    Router::new()
        .merge(lessons)
        .merge(users)
        .merge(stories)
        .merge(me)
        .layer(from_fn_with_state(verifier(), session_middleware))
}

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let response = app(Guard::default())
        .oneshot(request("GET", "/lessons", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_and_expired_tokens_are_unauthorized() {
    let app = app(Guard::default());

    let response = app
        .clone()
        .oneshot(request("GET", "/lessons", Some("invalid.token.here")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let expired = expired_token_for(&student("t1"));
    let response = app
        .oneshot(request("GET", "/lessons", Some(&expired)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_token_passes_guard() {
    let token = token_for(&student("t1"));
    let response = app(Guard::default())
        .oneshot(request("GET", "/lessons", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let token = token_for(&student("t1"));
    let request = Request::builder()
        .uri("/lessons")
        .header(header::COOKIE, format!("{}={}", COOKIE_NAME, token))
        .body(Body::empty())
        .unwrap();

    let response = app(Guard::default()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_insufficient_role_is_forbidden() {
    let token = token_for(&student("t1"));
    let response = app(Guard::default())
        .oneshot(request("DELETE", "/users/u9", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Cannot delete User");
}

#[tokio::test]
async fn test_policy_store_outage_in_deny_mode() {
    let (guard, _store) = failing_guard(PolicyFailureMode::Deny);
    let token = token_for(&student("t1"));
    let response = app(guard)
        .oneshot(request("GET", "/lessons", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Database error");
}

#[tokio::test]
async fn test_policy_store_outage_in_abstain_mode() {
    let (guard, _store) = failing_guard(PolicyFailureMode::Abstain);
    let token = token_for(&student("t1"));
    let response = app(guard)
        .oneshot(request("GET", "/lessons", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_handler_level_record_check() {
    let token = token_for(&coach("t1"));
    let app = app(Guard::default());

    let response = app
        .clone()
        .oneshot(request("PUT", "/stories/coach-1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("PUT", "/stories/coach-2", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Cannot update Story");
}

#[tokio::test]
async fn test_current_principal_is_optional() {
    let app = app(Guard::default());

    let response = app
        .clone()
        .oneshot(request("GET", "/me", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["id"].is_null());

    let token = token_for(&student("t1"));
    let response = app.oneshot(request("GET", "/me", Some(&token))).await.unwrap();
    assert_eq!(body_json(response).await["id"], "student-1");
}
