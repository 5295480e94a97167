//! `/auth/*` REST surface: login, refresh, logout, current-user, status.
//!
//! Grounded in the reference implementation's `a2a_server.auth_api` router
//! and `KeycloakAuthService.authenticate_password`/`refresh_session`: this
//! module proxies the OAuth2 resource-owner-password-credentials grant to
//! the configured OIDC token endpoint via `reqwest`, rather than reimplementing
//! token issuance locally — this server verifies tokens, it does not mint
//! them. `GET /auth/status` always responds, even with auth disabled, so
//! a client (or a test) can tell whether bearer tokens are required at all.
//!
//! Session state (the [`UserSession`] records themselves) is owned here, the
//! auth service, not by the request handler or the work queue: a session is
//! minted in [`SessionStore`] on successful login/refresh and reaped by its
//! expiry sweep, mirroring the work queue's lease-recovery sweep.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::A2AError;
use crate::server::auth::AuthVerifier;
use crate::server::session::{SessionStore, UserSession};

/// Shared state for the auth routes.
#[derive(Clone)]
pub struct AuthRoutesState {
    /// Auth configuration (issuer/client id/disabled flag/etc).
    pub config: AuthConfig,
    /// Token endpoint of the OIDC provider, used for login/refresh proxying.
    pub token_endpoint: String,
    /// Client used to verify bearer tokens for `/auth/me`.
    pub verifier: Arc<dyn AuthVerifier>,
    /// Session records minted on login/refresh, reaped by its expiry sweep.
    pub sessions: Arc<SessionStore>,
    http: reqwest::Client,
}

impl AuthRoutesState {
    /// Construct auth-route state from config, a token verifier, and a
    /// session store (shared with the sweep loop spawned at startup).
    pub fn new(
        config: AuthConfig,
        token_endpoint: String,
        verifier: Arc<dyn AuthVerifier>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            config,
            token_endpoint,
            verifier,
            sessions,
            http: reqwest::Client::new(),
        }
    }
}

/// `POST /auth/login` request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// OIDC username.
    pub username: String,
    /// OIDC password.
    pub password: String,
}

/// `POST /auth/refresh` request body.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// A previously issued refresh token.
    pub refresh_token: String,
}

/// `POST /auth/logout` request body. Evicts the named session from this
/// server's [`SessionStore`] immediately rather than waiting for its
/// expiry sweep; actual token revocation upstream is still the OIDC
/// provider's responsibility.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    /// The session (or refresh token) the client is giving up.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Successful token response, shared by login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, when the provider issues one.
    pub refresh_token: Option<String>,
    /// Seconds until `access_token` expires.
    pub expires_in: i64,
    /// Id of the [`UserSession`] this token was recorded against. Pass this
    /// back in `POST /auth/logout` to evict the session before its expiry.
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
}

/// `GET /auth/status` response.
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    /// Whether bearer tokens are required at all.
    pub enabled: bool,
    /// Configured issuer, for client discovery.
    pub issuer: String,
    /// Configured client id.
    pub client_id: String,
}

/// Build the `/auth/*` router.
pub fn auth_router(state: AuthRoutesState) -> Router {
    Router::new()
        .route("/auth/status", get(get_status))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .with_state(state)
}

async fn get_status(State(state): State<AuthRoutesState>) -> Json<AuthStatusResponse> {
    Json(AuthStatusResponse {
        enabled: !state.config.disabled,
        issuer: state.config.issuer.clone(),
        client_id: state.config.client_id.clone(),
    })
}

async fn login(
    State(state): State<AuthRoutesState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let params = [
        ("grant_type", "password"),
        ("client_id", state.config.client_id.as_str()),
        ("username", request.username.as_str()),
        ("password", request.password.as_str()),
    ];
    exchange(&state, &params).await.map(Json)
}

async fn refresh(
    State(state): State<AuthRoutesState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", state.config.client_id.as_str()),
        ("refresh_token", request.refresh_token.as_str()),
    ];
    exchange(&state, &params).await.map(Json)
}

/// Exchange credentials with the OIDC provider and record a [`UserSession`]
/// for the resulting token, so it's tracked and GC'able the way the base
/// spec requires rather than forgotten the moment the response is sent.
async fn exchange(state: &AuthRoutesState, params: &[(&str, &str)]) -> Result<TokenResponse, ApiError> {
    let response = state
        .http
        .post(&state.token_endpoint)
        .form(params)
        .send()
        .await
        .map_err(|e| ApiError(A2AError::ServiceUnavailable(format!("token endpoint unreachable: {e}"))))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, %body, "token exchange rejected by provider");
        return Err(ApiError(A2AError::authentication_failed(format!(
            "token exchange rejected ({status})"
        ))));
    }

    let parsed: ProviderTokenResponse = response
        .json()
        .await
        .map_err(|e| ApiError(A2AError::ServiceUnavailable(format!("invalid token response: {e}"))))?;

    let now = Utc::now();
    let ttl = if parsed.expires_in > 0 {
        chrono::Duration::seconds(parsed.expires_in)
    } else {
        chrono::Duration::from_std(state.config.session_ttl).unwrap_or(chrono::Duration::seconds(3600))
    };

    let (subject, roles) = match state.verifier.verify(&parsed.access_token).await {
        Ok(claims) => (claims.sub.clone(), claims.roles().to_vec()),
        Err(e) => {
            warn!(error = %e, "minted token failed local verification, recording session with empty claims");
            (String::new(), Vec::new())
        }
    };

    let session_id = Uuid::new_v4().to_string();
    state
        .sessions
        .insert(UserSession {
            user_id: subject.clone(),
            session_id: session_id.clone(),
            subject,
            access_token: parsed.access_token.clone(),
            refresh_token: parsed.refresh_token.clone(),
            issued_at: now,
            expires_at: now + ttl,
            roles,
        })
        .await;

    debug!(session_id, "token exchange succeeded, session recorded");
    Ok(TokenResponse {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_in: parsed.expires_in,
        session_id,
    })
}

async fn logout(
    State(state): State<AuthRoutesState>,
    Json(request): Json<LogoutRequest>,
) -> Json<serde_json::Value> {
    if let Some(session_id) = &request.session_id {
        state.sessions.remove(session_id).await;
    }
    debug!(session_id = ?request.session_id, "logout acknowledged");
    Json(serde_json::json!({ "success": true }))
}

async fn me(
    State(state): State<AuthRoutesState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError(A2AError::authentication_failed("missing bearer token")))?;
    let claims = state.verifier.verify(token).await.map_err(ApiError)?;
    Ok(Json(serde_json::json!({
        "sub": claims.sub,
        "preferredUsername": claims.preferred_username,
        "roles": claims.roles(),
    })))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Thin wrapper so [`A2AError`] can be returned directly from axum handlers.
struct ApiError(A2AError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            A2AError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
            A2AError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<A2AError> for ApiError {
    fn from(err: A2AError) -> Self {
        ApiError(err)
    }
}

/// Convenience used by callers constructing [`AuthRoutesState`] directly
/// from a [`crate::config::ServerConfig`].
pub fn token_endpoint_from_issuer(issuer: &str) -> String {
    format!("{}/protocol/openid-connect/token", issuer.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_appends_keycloak_suffix() {
        assert_eq!(
            token_endpoint_from_issuer("https://idp.example/realms/app"),
            "https://idp.example/realms/app/protocol/openid-connect/token"
        );
    }

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }
}
