use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fs;
use uuid::Uuid;

use super::error::AuthzError;
use crate::config::{JwtAlgorithm, JwtConfig};
use crate::models::{Principal, SessionClaims};

/// Verifies session tokens and turns them into principals.
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
    token_expiry_minutes: i64,
}

impl JwtService {
    /// Create a JWT service from configuration. RS256 keys are read from disk.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let (algorithm, decoding_key, encoding_key) = match config.algorithm {
            JwtAlgorithm::RS256 => {
                let public_key_path = config
                    .public_key_path
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("JWT public key path is not configured"))?;
                let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

                let encoding_key = match config.private_key_path.as_deref() {
                    Some(path) => {
                        let private_key_pem = fs::read_to_string(path).map_err(|e| {
                            anyhow::anyhow!("Failed to read private key from {}: {}", path, e)
                        })?;
                        Some(
                            EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                                .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?,
                        )
                    }
                    None => None,
                };
                (Algorithm::RS256, decoding_key, encoding_key)
            }
            JwtAlgorithm::HS256 => {
                let secret = config
                    .secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("JWT secret is not configured"))?;
                (
                    Algorithm::HS256,
                    DecodingKey::from_secret(secret.as_bytes()),
                    Some(EncodingKey::from_secret(secret.as_bytes())),
                )
            }
        };

        tracing::info!(
            algorithm = ?algorithm,
            issuer = ?config.issuer,
            audience = ?config.audience,
            "JWT service initialized"
        );

        Ok(Self::build(
            algorithm,
            decoding_key,
            encoding_key,
            config.issuer.clone(),
            config.audience.clone(),
            config.leeway_seconds,
            config.token_expiry_minutes,
        ))
    }

    /// HS256 service with a shared secret, for development and tests.
    pub fn from_secret(secret: &str) -> Self {
        Self::build(
            Algorithm::HS256,
            DecodingKey::from_secret(secret.as_bytes()),
            Some(EncodingKey::from_secret(secret.as_bytes())),
            None,
            None,
            0,
            15,
        )
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        self.validation.set_issuer(&[issuer.as_str()]);
        self.issuer = Some(issuer);
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        let audience = audience.into();
        self.validation.set_audience(&[audience.as_str()]);
        self.validation.validate_aud = true;
        self.audience = Some(audience);
        self
    }

    fn build(
        algorithm: Algorithm,
        decoding_key: DecodingKey,
        encoding_key: Option<EncodingKey>,
        issuer: Option<String>,
        audience: Option<String>,
        leeway_seconds: u64,
        token_expiry_minutes: i64,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway_seconds;
        validation.validate_exp = true;
        validation.validate_aud = false;

        let service = Self {
            algorithm,
            decoding_key,
            encoding_key,
            validation,
            issuer: None,
            audience: None,
            token_expiry_minutes,
        };
        let service = match issuer {
            Some(issuer) => service.with_issuer(issuer),
            None => service,
        };
        match audience {
            Some(audience) => service.with_audience(audience),
            None => service,
        }
    }

    /// Verify signature, expiry, issuer and audience and return the claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthzError> {
        let token_data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }

    /// The principal a token stands for, or `None` when it does not verify.
    pub fn principal_from_token(&self, token: &str) -> Option<Principal> {
        match self.verify(token) {
            Ok(claims) => {
                let principal = Principal::from_claims(&claims);
                if principal.is_none() {
                    tracing::debug!("Session token carries a blank subject");
                }
                principal
            }
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                None
            }
        }
    }

    /// Mint a session token for `principal`. Token issuance belongs to the
    /// identity service; this exists for development tooling and tests.
    pub fn issue(&self, principal: &Principal) -> Result<String, AuthzError> {
        let encoding_key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| AuthzError::Config(anyhow::anyhow!("No signing key configured")))?;

        let now = Utc::now();
        let exp = now + Duration::minutes(self.token_expiry_minutes);
        let mut roles = principal.roles.iter();

        let claims = SessionClaims {
            user_id: principal.id.clone(),
            tenant_id: principal.tenant_id.clone(),
            role: roles.next().cloned().unwrap_or_default(),
            roles: roles.cloned().collect(),
            email: principal.email.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Some(Uuid::new_v4().to_string()),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        Ok(encode(&Header::new(self.algorithm), &claims, encoding_key)?)
    }
}
