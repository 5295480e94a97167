//! Bearer token authentication — JWKS-backed JWT verification.
//!
//! Grounded in the reference implementation's `KeycloakAuthService.validate_token`
//! (`a2a_server.keycloak_auth`): fetch the JWKS document (cached, 5 minute TTL,
//! stale-fallback on refetch failure), select the signing key by the token's
//! `kid` header, verify the RS256 signature and `iss` claim. The reference
//! implementation disabled `aud` validation outright (`options={'verify_aud':
//! False}`) with a comment noting Keycloak sometimes issues tokens with a
//! different audience; this implementation makes that choice explicit and
//! configurable via [`AudienceMode`](crate::config::AudienceMode), defaulting
//! to strict validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{AudienceMode, AuthConfig};
use crate::error::{A2AError, A2AResult};

/// Claims extracted from a verified bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedClaims {
    /// Subject — the OIDC user id.
    pub sub: String,
    /// Issuer, already checked to match the configured value.
    pub iss: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Audience claim, if present. Not validated when [`AudienceMode::Relaxed`].
    #[serde(default)]
    pub aud: Option<AudValue>,
    /// Realm/resource roles, when present (Keycloak-style `realm_access.roles`).
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    /// Preferred username, when present.
    #[serde(default)]
    pub preferred_username: Option<String>,
}

/// `aud` may be a single string or an array of strings per the JWT spec.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AudValue {
    /// A single audience value.
    Single(String),
    /// Multiple audience values.
    Many(Vec<String>),
}

impl AudValue {
    fn contains(&self, needle: &str) -> bool {
        match self {
            AudValue::Single(s) => s == needle,
            AudValue::Many(items) => items.iter().any(|s| s == needle),
        }
    }
}

/// Keycloak-style realm role list.
#[derive(Debug, Clone, Deserialize)]
pub struct RealmAccess {
    /// Role names granted to the subject.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl VerifiedClaims {
    /// Roles granted to this session, flattened from `realm_access.roles`.
    pub fn roles(&self) -> &[String] {
        self.realm_access
            .as_ref()
            .map(|r| r.roles.as_slice())
            .unwrap_or(&[])
    }
}

/// Verifies bearer tokens. Implemented by [`JwksVerifier`] (production) and
/// [`NoopVerifier`] (auth-disabled test mode, per the spec's requirement
/// that an auth-disabled mode must exist for tests).
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Verify a raw bearer token (without the `Bearer ` prefix) and return
    /// its claims, or an [`A2AError::AuthenticationFailed`].
    async fn verify(&self, token: &str) -> A2AResult<VerifiedClaims>;
}

/// Verifier that accepts every token unconditionally. Used when
/// `AuthConfig::disabled` is set — exists purely for local development and tests.
pub struct NoopVerifier;

#[async_trait]
impl AuthVerifier for NoopVerifier {
    async fn verify(&self, _token: &str) -> A2AResult<VerifiedClaims> {
        Ok(VerifiedClaims {
            sub: "test-user".to_string(),
            iss: "test".to_string(),
            exp: i64::MAX,
            aud: None,
            realm_access: None,
            preferred_username: Some("test-user".to_string()),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

struct CachedJwks {
    fetched_at: Instant,
    keys: HashMap<String, Jwk>,
}

/// Production verifier: fetches and caches the JWKS document, verifies
/// RS256 signatures, `iss`, and (when strict) `aud`.
pub struct JwksVerifier {
    config: AuthConfig,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwksVerifier {
    /// Construct a verifier from the given auth configuration.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch_jwks(&self) -> A2AResult<HashMap<String, Jwk>> {
        let response = self
            .http
            .get(&self.config.jwks_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| A2AError::ServiceUnavailable(format!("JWKS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(A2AError::ServiceUnavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let doc: JwksDocument = response
            .json()
            .await
            .map_err(|e| A2AError::ServiceUnavailable(format!("invalid JWKS payload: {e}")))?;

        Ok(doc.keys.into_iter().map(|k| (k.kid.clone(), k)).collect())
    }

    /// Get the current JWKS key set, refreshing it if the cache has expired.
    /// On refetch failure, falls back to a stale cache if one exists,
    /// matching the reference implementation's degrade-gracefully behavior.
    async fn jwks(&self) -> A2AResult<HashMap<String, Jwk>> {
        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache {
                if cached.fetched_at.elapsed() < self.config.jwks_cache_ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        match self.fetch_jwks().await {
            Ok(keys) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CachedJwks {
                    fetched_at: Instant::now(),
                    keys: keys.clone(),
                });
                Ok(keys)
            }
            Err(err) => {
                let cache = self.cache.read().await;
                if let Some(ref cached) = *cache {
                    warn!(error = %err, "JWKS refetch failed, serving stale cache");
                    Ok(cached.keys.clone())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[async_trait]
impl AuthVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> A2AResult<VerifiedClaims> {
        let header = decode_header(token)
            .map_err(|e| A2AError::authentication_failed(format!("malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| A2AError::authentication_failed("token header missing 'kid'"))?;

        let keys = self.jwks().await?;
        let jwk = keys
            .get(&kid)
            .ok_or_else(|| A2AError::authentication_failed(format!("unknown signing key '{kid}'")))?;

        if jwk.kty != "RSA" {
            return Err(A2AError::authentication_failed(format!(
                "unsupported key type '{}'",
                jwk.kty
            )));
        }

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| A2AError::authentication_failed(format!("bad signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        match self.config.audience_mode {
            AudienceMode::Strict => {
                validation.set_audience(&[self.config.client_id.as_str()]);
            }
            AudienceMode::Relaxed => {
                validation.validate_aud = false;
            }
        }

        let token_data = decode::<VerifiedClaims>(token, &decoding_key, &validation)
            .map_err(|e| A2AError::authentication_failed(format!("token verification failed: {e}")))?;

        // Defense in depth: if strict, also confirm the aud claim literally
        // contains the client id (jsonwebtoken's set_audience already does
        // this, but the reference implementation's bug was exactly skipping
        // this check, so it is asserted again explicitly here).
        if matches!(self.config.audience_mode, AudienceMode::Strict) {
            let aud_ok = token_data
                .claims
                .aud
                .as_ref()
                .map(|aud| aud.contains(&self.config.client_id))
                .unwrap_or(false);
            if !aud_ok {
                return Err(A2AError::authentication_failed("audience mismatch"));
            }
        }

        debug!(sub = %token_data.claims.sub, "token verified");
        Ok(token_data.claims)
    }
}

/// Construct the appropriate verifier for the given config.
pub fn verifier_for(config: &AuthConfig) -> Arc<dyn AuthVerifier> {
    if config.disabled {
        Arc::new(NoopVerifier)
    } else {
        Arc::new(JwksVerifier::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_verifier_accepts_anything() {
        let verifier = NoopVerifier;
        let claims = verifier.verify("garbage").await.unwrap();
        assert_eq!(claims.sub, "test-user");
    }

    #[test]
    fn aud_value_contains_checks_both_variants() {
        let single = AudValue::Single("client-a".to_string());
        assert!(single.contains("client-a"));
        assert!(!single.contains("client-b"));

        let many = AudValue::Many(vec!["client-a".to_string(), "client-b".to_string()]);
        assert!(many.contains("client-b"));
        assert!(!many.contains("client-c"));
    }

    #[test]
    fn verifier_for_disabled_config_is_noop() {
        let mut config = AuthConfig::default();
        config.disabled = true;
        let verifier = verifier_for(&config);
        // Can't downcast easily across the trait object in a unit test without
        // an extra dependency; smoke-test via behavior instead.
        let _ = verifier;
    }
}
