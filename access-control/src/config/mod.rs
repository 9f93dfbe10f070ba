use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::services::guard::PolicyFailureMode;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub guard: GuardConfig,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwtAlgorithm {
    RS256,
    HS256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub algorithm: JwtAlgorithm,
    /// PEM public key used to verify RS256 tokens.
    pub public_key_path: Option<String>,
    /// PEM private key, only needed to mint RS256 tokens.
    pub private_key_path: Option<String>,
    /// Shared secret for HS256.
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
    pub token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    pub policies_enabled: bool,
    pub policy_failure_mode: PolicyFailureMode,
    /// Zero disables the ability cache.
    pub ability_cache_ttl_seconds: u64,
    /// Load role templates from the database catalog on top of the built-in ones.
    pub catalog_enabled: bool,
}

impl GuardConfig {
    pub fn ability_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ability_cache_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_source(common_config, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_source<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_str = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let get = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let policies_enabled =
            parse_flag("POLICIES_ENABLED", get("POLICIES_ENABLED", Some("false"))?)?;

        let database = match lookup("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_var(
                    "DATABASE_MAX_CONNECTIONS",
                    get("DATABASE_MAX_CONNECTIONS", Some("10"))?,
                )?,
            }),
            None => None,
        };

        let config = AccessConfig {
            common,
            environment: environment.clone(),
            jwt: JwtConfig {
                algorithm: get("JWT_ALGORITHM", Some("RS256"))?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                public_key_path: lookup("JWT_PUBLIC_KEY_PATH"),
                private_key_path: lookup("JWT_PRIVATE_KEY_PATH"),
                secret: lookup("JWT_SECRET"),
                issuer: lookup("JWT_ISSUER"),
                audience: lookup("JWT_AUDIENCE"),
                leeway_seconds: parse_var(
                    "JWT_LEEWAY_SECONDS",
                    get("JWT_LEEWAY_SECONDS", Some("30"))?,
                )?,
                token_expiry_minutes: parse_var(
                    "JWT_TOKEN_EXPIRY_MINUTES",
                    get("JWT_TOKEN_EXPIRY_MINUTES", Some("15"))?,
                )?,
            },
            session: SessionConfig {
                cookie_name: get("SESSION_COOKIE_NAME", Some("session"))?,
            },
            guard: GuardConfig {
                policies_enabled,
                policy_failure_mode: get("POLICY_FAILURE_MODE", Some("abstain"))?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                ability_cache_ttl_seconds: parse_var(
                    "ABILITY_CACHE_TTL_SECONDS",
                    get("ABILITY_CACHE_TTL_SECONDS", Some("0"))?,
                )?,
                catalog_enabled: parse_flag(
                    "ROLE_CATALOG_ENABLED",
                    get("ROLE_CATALOG_ENABLED", Some("false"))?,
                )?,
            },
            database,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        match self.jwt.algorithm {
            JwtAlgorithm::RS256 if self.jwt.public_key_path.is_none() => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_PUBLIC_KEY_PATH is required for RS256"
                )));
            }
            JwtAlgorithm::HS256 if self.jwt.secret.as_deref().map_or(true, str::is_empty) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET is required for HS256"
                )));
            }
            _ => {}
        }

        if self.jwt.token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if (self.guard.policies_enabled || self.guard.catalog_enabled) && self.database.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required when policies or the role catalog are enabled"
            )));
        }

        if self.environment == Environment::Prod {
            if self.jwt.algorithm == JwtAlgorithm::HS256 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "HS256 session tokens are not allowed in production"
                )));
            }

            if self.guard.policies_enabled
                && self.guard.policy_failure_mode == PolicyFailureMode::Abstain
            {
                tracing::warn!(
                    "Resource policies are skipped when the policy store fails - consider POLICY_FAILURE_MODE=deny"
                );
            }
        }

        Ok(())
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if let Some(def) = default {
                Ok(def.to_string())
            } else if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_var<T>(key: &str, value: String) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, value, e))
    })
}

/// Only `true` and `false` are accepted, in any case.
fn parse_flag(key: &str, value: String) -> Result<bool, AppError> {
    parse_var(key, value.to_ascii_lowercase())
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for JwtAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RS256" => Ok(JwtAlgorithm::RS256),
            "HS256" => Ok(JwtAlgorithm::HS256),
            _ => Err(format!("Unsupported JWT algorithm: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AccessConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AccessConfig::from_source(core_config::Config::default(), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_dev_defaults() {
        let config = load(&[("JWT_ALGORITHM", "hs256"), ("JWT_SECRET", "dev-secret")]).unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.jwt.algorithm, JwtAlgorithm::HS256);
        assert_eq!(config.jwt.leeway_seconds, 30);
        assert_eq!(config.session.cookie_name, "session");
        assert!(!config.guard.policies_enabled);
        assert_eq!(config.guard.policy_failure_mode, PolicyFailureMode::Abstain);
        assert!(config.guard.ability_cache_ttl().is_zero());
        assert!(config.database.is_none());
    }

    #[test]
    fn test_rs256_requires_public_key() {
        assert!(load(&[]).is_err());
        let config = load(&[("JWT_PUBLIC_KEY_PATH", "/keys/public.pem")]).unwrap();
        assert_eq!(config.jwt.algorithm, JwtAlgorithm::RS256);
    }

    #[test]
    fn test_hs256_rejected_in_prod() {
        let err = load(&[
            ("ENVIRONMENT", "prod"),
            ("JWT_ALGORITHM", "HS256"),
            ("JWT_SECRET", "s"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("HS256"));
    }

    #[test]
    fn test_policies_need_database() {
        let base = [
            ("JWT_PUBLIC_KEY_PATH", "/keys/public.pem"),
            ("POLICIES_ENABLED", "true"),
        ];
        assert!(load(&base).is_err());

        let config = load(&[
            base[0],
            base[1],
            ("DATABASE_URL", "postgres://localhost/lessons"),
            ("POLICY_FAILURE_MODE", "deny"),
            ("ABILITY_CACHE_TTL_SECONDS", "60"),
        ])
        .unwrap();
        assert_eq!(config.guard.policy_failure_mode, PolicyFailureMode::Deny);
        assert_eq!(config.guard.ability_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.database.map(|d| d.max_connections), Some(10));
    }

    #[test]
    fn test_malformed_switches_are_rejected() {
        let base = [
            ("JWT_PUBLIC_KEY_PATH", "/keys/public.pem"),
            ("DATABASE_URL", "postgres://localhost/lessons"),
        ];
        for (key, value) in [
            ("POLICIES_ENABLED", "1"),
            ("POLICIES_ENABLED", "yes"),
            ("ROLE_CATALOG_ENABLED", "on"),
            ("ABILITY_CACHE_TTL_SECONDS", "-5"),
            ("JWT_LEEWAY_SECONDS", "soon"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ] {
            let err = load(&[base[0], base[1], (key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{} = {}", key, value);
        }
    }

    #[test]
    fn test_switches_ignore_case() {
        let config = load(&[
            ("JWT_PUBLIC_KEY_PATH", "/keys/public.pem"),
            ("DATABASE_URL", "postgres://localhost/lessons"),
            ("POLICIES_ENABLED", "TRUE"),
            ("ROLE_CATALOG_ENABLED", "False"),
        ])
        .unwrap();
        assert!(config.guard.policies_enabled);
        assert!(!config.guard.catalog_enabled);
    }

    #[test]
    fn test_invalid_environment() {
        assert!(load(&[("ENVIRONMENT", "staging")]).is_err());
    }
}
