//! In-memory user session store and expiry GC sweep.
//!
//! Sessions are minted on successful `/auth/login` or `/auth/refresh` and
//! reaped once `now >= expires_at`, the invariant the base spec assigns to
//! the auth service. The sweep loop mirrors
//! [`super::queue::workers::WorkerCoordinator::run_sweep_loop`] exactly:
//! a ticking background task pruning a `RwLock`-guarded table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A server-tracked, garbage-collectable record of an authenticated user's
/// session, distinct from [`super::auth::VerifiedClaims`] (an ephemeral,
/// per-request view of a token's claims that is never stored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// OIDC subject, duplicated from `subject` for callers that key on it directly.
    pub user_id: String,
    /// Server-assigned session id, the external handle for this record.
    pub session_id: String,
    /// OIDC subject claim (`sub`) the access token was issued for.
    pub subject: String,
    /// Current bearer access token.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// When this session (or its current token) was issued.
    pub issued_at: DateTime<Utc>,
    /// When this session expires and becomes eligible for GC.
    pub expires_at: DateTime<Utc>,
    /// Roles granted to the subject at issuance time.
    pub roles: Vec<String>,
}

impl UserSession {
    /// A session is valid only while `now < expires_at`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`UserSession`] store with an expiry sweep. Owned by the auth
/// service, the same ownership the base spec assigns to session state.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, UserSession>>,
    sweep_interval: Duration,
}

impl SessionStore {
    /// Construct an empty store, sweeping expired sessions every `sweep_interval`.
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sweep_interval,
        }
    }

    /// Insert or replace a session.
    pub async fn insert(&self, session: UserSession) {
        let mut sessions = self.sessions.write().await;
        debug!(session_id = %session.session_id, user_id = %session.user_id, "user session created");
        sessions.insert(session.session_id.clone(), session);
    }

    /// Fetch a session by id, regardless of whether it has expired.
    pub async fn get(&self, session_id: &str) -> Option<UserSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove a session explicitly (client-initiated logout).
    pub async fn remove(&self, session_id: &str) -> Option<UserSession> {
        self.sessions.write().await.remove(session_id)
    }

    /// Remove every session whose `expires_at` has passed. Returns the ids reaped.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| !s.is_valid(now))
            .map(|s| s.session_id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    /// Number of sessions currently tracked, expired or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Run the periodic expiry sweep until the process shuts down. Intended
    /// to be spawned once as a background task, alongside the queue's
    /// lease/worker-staleness sweep loop.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            let reaped = self.sweep_expired().await;
            if !reaped.is_empty() {
                info!(count = reaped.len(), "garbage-collected expired user sessions");
            }
        }
    }
}
