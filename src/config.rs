//! Server configuration — environment-driven, with CLI overrides.
//!
//! Mirrors the conventions of `a2a_server.config.load_config()` in the
//! Python reference: env vars with `A2A_`-prefixed names and sane defaults,
//! loaded once at process start and threaded through as an explicit value
//! rather than read ad-hoc from handlers.

use std::env;
use std::time::Duration;

use crate::error::{A2AError, A2AResult};

/// How strictly the `aud` claim of an inbound bearer token is checked.
///
/// See the audience-check open question: the reference implementation
/// disabled this check entirely. This type makes the choice explicit and
/// defaults to [`AudienceMode::Strict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceMode {
    /// `aud` must contain the configured client id.
    Strict,
    /// `aud` is not checked. Exists for interop with multi-audience tokens;
    /// must be opted into explicitly.
    Relaxed,
}

impl AudienceMode {
    fn from_env(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "relaxed" | "disabled" | "off" => AudienceMode::Relaxed,
            _ => AudienceMode::Strict,
        }
    }
}

/// Where task/codebase/agent-task state is durably stored.
#[derive(Debug, Clone)]
pub enum PersistenceBackend {
    /// Non-durable, process-local storage. Data is lost on restart.
    Memory,
    /// SQLite-backed durable storage at the given path.
    Sqlite { path: String },
}

/// OIDC/JWKS verification settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// When `true`, the auth middleware is bypassed entirely. For tests only.
    pub disabled: bool,
    /// Expected token issuer (`iss` claim), e.g. `https://issuer.example/realms/app`.
    pub issuer: String,
    /// JWKS endpoint to fetch signing keys from.
    pub jwks_url: String,
    /// Client id, used only when `audience_mode` is `Strict`.
    pub client_id: String,
    /// Audience validation strictness.
    pub audience_mode: AudienceMode,
    /// How long a fetched JWKS document is trusted before refetching.
    pub jwks_cache_ttl: Duration,
    /// Lifetime assigned to a session record minted on login/refresh when
    /// the provider's `expires_in` is absent or non-positive.
    pub session_ttl: Duration,
    /// How often the session store's expiry sweep runs.
    pub session_sweep_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: true,
            issuer: String::new(),
            jwks_url: String::new(),
            client_id: String::new(),
            audience_mode: AudienceMode::Strict,
            jwks_cache_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(3600),
            session_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Work queue / worker coordinator timing knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often a worker is expected to heartbeat.
    pub heartbeat_interval: Duration,
    /// A worker is considered stale after this many missed heartbeats.
    pub stale_after_missed_heartbeats: u32,
    /// A RUNNING agent task with no status update for this long is revived to PENDING.
    pub lease_timeout: Duration,
    /// How often the lease-recovery sweep runs.
    pub sweep_interval: Duration,
    /// Maximum size, in bytes, of a stored `result`/`error` payload before truncation.
    pub max_result_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            stale_after_missed_heartbeats: 3,
            lease_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            max_result_bytes: 5 * 1024,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How task/codebase/agent-task state is stored.
    pub persistence: PersistenceBackend,
    /// OIDC/JWKS verification settings.
    pub auth: AuthConfig,
    /// Work queue timing knobs.
    pub queue: QueueConfig,
    /// SSE keepalive interval, sent as a `: heartbeat` comment when idle.
    pub sse_heartbeat: Duration,
    /// Deadline for a single suspension point (JWKS fetch, persistence call,
    /// worker HTTP call) unless the operation has its own more specific deadline.
    pub default_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            persistence: PersistenceBackend::Memory,
            auth: AuthConfig::default(),
            queue: QueueConfig::default(),
            sse_heartbeat: Duration::from_secs(30),
            default_deadline: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Recognised variables: `A2A_HOST`, `A2A_PORT`, `A2A_PERSISTENCE`
    /// (`memory` | `sqlite`), `A2A_SQLITE_PATH`, `A2A_AUTH_DISABLED`,
    /// `A2A_OIDC_ISSUER`, `A2A_OIDC_JWKS_URL`, `A2A_OIDC_CLIENT_ID`,
    /// `A2A_OIDC_AUDIENCE_MODE` (`strict` | `relaxed`), `A2A_HEARTBEAT_INTERVAL_S`,
    /// `A2A_LEASE_TIMEOUT_S`.
    pub fn from_env() -> A2AResult<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("A2A_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = env::var("A2A_PORT") {
            cfg.port = port
                .parse()
                .map_err(|_| A2AError::internal_error(format!("invalid A2A_PORT: {port}")))?;
        }

        cfg.persistence = match env::var("A2A_PERSISTENCE").as_deref() {
            Ok("sqlite") => PersistenceBackend::Sqlite {
                path: env::var("A2A_SQLITE_PATH").unwrap_or_else(|_| "a2a.db".to_string()),
            },
            _ => PersistenceBackend::Memory,
        };

        cfg.auth.disabled = env_bool("A2A_AUTH_DISABLED", cfg.auth.disabled);
        if let Ok(issuer) = env::var("A2A_OIDC_ISSUER") {
            cfg.auth.issuer = issuer;
        }
        if let Ok(jwks_url) = env::var("A2A_OIDC_JWKS_URL") {
            cfg.auth.jwks_url = jwks_url;
        }
        if let Ok(client_id) = env::var("A2A_OIDC_CLIENT_ID") {
            cfg.auth.client_id = client_id;
        }
        if let Ok(mode) = env::var("A2A_OIDC_AUDIENCE_MODE") {
            cfg.auth.audience_mode = AudienceMode::from_env(&mode);
        }

        if let Ok(secs) = env::var("A2A_HEARTBEAT_INTERVAL_S") {
            cfg.queue.heartbeat_interval = Duration::from_secs(parse_secs(&secs)?);
        }
        if let Ok(secs) = env::var("A2A_LEASE_TIMEOUT_S") {
            cfg.queue.lease_timeout = Duration::from_secs(parse_secs(&secs)?);
        }

        Ok(cfg)
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn parse_secs(raw: &str) -> A2AResult<u64> {
    raw.parse()
        .map_err(|_| A2AError::internal_error(format!("invalid duration seconds: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_auth_disabled_memory_backend() {
        let cfg = ServerConfig::default();
        assert!(cfg.auth.disabled);
        assert!(matches!(cfg.persistence, PersistenceBackend::Memory));
        assert_eq!(cfg.auth.audience_mode, AudienceMode::Strict);
    }

    #[test]
    fn audience_mode_parses_relaxed_variants() {
        assert_eq!(AudienceMode::from_env("relaxed"), AudienceMode::Relaxed);
        assert_eq!(AudienceMode::from_env("off"), AudienceMode::Relaxed);
        assert_eq!(AudienceMode::from_env("strict"), AudienceMode::Strict);
        assert_eq!(AudienceMode::from_env("garbage"), AudienceMode::Strict);
    }
}
