//! Authorization core for the lesson platform.
//!
//! Session tokens become [`Principal`](models::Principal)s, roles become
//! capability [`Ability`](models::Ability) sets, and the [`Guard`] combines
//! them with tenant-scoped resource policies into one decision per request.

pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;

use service_core::error::AppError;
use sqlx::postgres::PgPool;
use std::sync::Arc;

use crate::config::AccessConfig;
use crate::middleware::{RouteGuard, SessionVerifier};
use crate::services::{
    load_role_templates, AbilityBuilder, AbilityCache, AuthzError, Guard, JwtService,
    PgPolicyStore, PgRoleCatalog, RequiredRule, RoleTemplates,
};

pub use crate::services::{casl_guard, casl_guard_with_policies};

/// Wired authorization components for one process.
#[derive(Clone)]
pub struct AccessControl {
    pub config: AccessConfig,
    pub guard: Guard,
    pub sessions: SessionVerifier,
    pub pool: Option<PgPool>,
}

impl AccessControl {
    /// Load configuration from the environment, set up tracing and wire
    /// every component.
    pub async fn init() -> Result<Self, AppError> {
        let config = AccessConfig::from_env()?;
        service_core::observability::init_tracing(
            &config.common.service_name,
            &config.common.log_level,
            config.common.otlp_endpoint.as_deref(),
        )?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: AccessConfig) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt).map_err(AppError::ConfigError)?;

        let pool = match &config.database {
            Some(database) => {
                let pool = db::create_pool(database)
                    .await
                    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
                db::run_migrations(&pool)
                    .await
                    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
                Some(pool)
            }
            None => None,
        };

        let mut templates = RoleTemplates::builtin();
        if let (true, Some(pool)) = (config.guard.catalog_enabled, &pool) {
            let catalog = PgRoleCatalog::new(pool.clone());
            let loaded = load_role_templates(&catalog)
                .await
                .map_err(AuthzError::from)?;
            templates = templates.merge(loaded);
        }

        let cache = AbilityCache::new(config.guard.ability_cache_ttl());
        if cache.is_enabled() {
            cache.spawn_purge_task(cache.ttl());
        }
        let mut guard = Guard::new(AbilityBuilder::new(templates))
            .with_cache(cache)
            .with_failure_mode(config.guard.policy_failure_mode);
        if let (true, Some(pool)) = (config.guard.policies_enabled, &pool) {
            guard = guard.with_policy_store(Arc::new(PgPolicyStore::new(pool.clone())));
        }

        tracing::info!(
            environment = ?config.environment,
            policies_enabled = config.guard.policies_enabled,
            catalog_enabled = config.guard.catalog_enabled,
            ability_cache_ttl_seconds = config.guard.ability_cache_ttl_seconds,
            "Access control initialized"
        );

        let sessions = SessionVerifier::new(jwt, config.session.cookie_name.clone());
        Ok(Self {
            config,
            guard,
            sessions,
            pool,
        })
    }

    pub fn route_guard(&self, required: Vec<RequiredRule>) -> RouteGuard {
        RouteGuard::new(self.guard.clone(), required)
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        if let Some(pool) = &self.pool {
            db::health_check(pool).await.map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                AppError::DatabaseError(anyhow::anyhow!(e))
            })?;
        }
        Ok(())
    }
}
