//! Test helpers for access-control integration tests.

#![allow(dead_code)]

use access_control::models::{Principal, ResourcePolicy};
use access_control::services::jwt::JwtService;
use access_control::services::{
    Guard, InMemoryPolicyStore, PolicyFailureMode, PolicyStore, PolicyStoreError,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const TEST_SECRET: &str = "access-control-test-secret";
pub const COOKIE_NAME: &str = "session";

pub fn jwt() -> JwtService {
    JwtService::from_secret(TEST_SECRET)
}

pub fn student(tenant: &str) -> Principal {
    Principal::new("student-1", Some(tenant), ["student"]).with_email("student@example.com")
}

pub fn coach(tenant: &str) -> Principal {
    Principal::new("coach-1", Some(tenant), ["coach"]).with_email("coach@example.com")
}

pub fn admin(tenant: &str) -> Principal {
    Principal::new("admin-1", Some(tenant), ["admin"]).with_email("admin@example.com")
}

pub fn token_for(principal: &Principal) -> String {
    jwt().issue(principal).unwrap()
}

/// A token for `principal` that expired an hour ago.
pub fn expired_token_for(principal: &Principal) -> String {
    let now = Utc::now();
    let claims = serde_json::json!({
        "userId": principal.id,
        "tenantId": principal.tenant_id,
        "role": principal.roles.first().cloned().unwrap_or_default(),
        "email": principal.email,
        "exp": (now - Duration::hours(1)).timestamp(),
        "iat": (now - Duration::hours(2)).timestamp(),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn policy_guard(policies: Vec<ResourcePolicy>) -> Guard {
    Guard::default().with_policy_store(Arc::new(InMemoryPolicyStore::new(policies)))
}

pub fn failing_guard(mode: PolicyFailureMode) -> (Guard, Arc<FailingPolicyStore>) {
    let store = Arc::new(FailingPolicyStore::default());
    let guard = Guard::default()
        .with_policy_store(store.clone())
        .with_failure_mode(mode);
    (guard, store)
}

/// Store whose every read fails.
#[derive(Default)]
pub struct FailingPolicyStore {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PolicyStore for FailingPolicyStore {
    async fn active_policies(
        &self,
        _resource: &str,
        _tenant_id: Option<&str>,
    ) -> Result<Vec<ResourcePolicy>, PolicyStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PolicyStoreError::Database(sqlx::Error::PoolTimedOut))
    }
}
