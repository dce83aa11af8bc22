//! Session state and auth operations.
//!
//! `SessionManager` is the only writer of the session flags. Everything
//! else (navigation guard, chat client, CLI) holds a clone and reads
//! snapshots, so the `is_admin ⇒ is_authenticated` invariant is enforced
//! in exactly one place.

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Point-in-time view of the session.
///
/// Starts in the unresolved state (`is_loading = true`); the first
/// `check_auth` settles it one way or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub is_admin: bool,
    pub is_loading: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            is_authenticated: false,
            is_admin: false,
            is_loading: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: String,
    #[serde(default)]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    api: ApiClient,
    state: Arc<RwLock<Session>>,
    /// Serializes `check_auth` so overlapping callers cannot interleave
    /// refresh attempts and flag writes.
    resolve_gate: Arc<Mutex<()>>,
}

impl SessionManager {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(Session::default())),
            resolve_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn snapshot(&self) -> Session {
        *self.state.read().expect("session state poisoned")
    }

    /// Resolve the session against `/user-info`.
    ///
    /// A 401 triggers exactly one `/refresh` followed by one retry of the
    /// identity call; a failing retry settles the session as logged out.
    /// `is_loading` clears on every exit path.
    pub async fn check_auth(&self) -> Session {
        let _gate = self.resolve_gate.lock().await;
        let resolved = self.resolve_identity().await;
        self.settle(resolved)
    }

    async fn resolve_identity(&self) -> Option<UserInfo> {
        let mut refreshed = false;
        loop {
            match self.api.get_json::<UserInfo>("/user-info", true).await {
                Ok(info) => return Some(info),
                Err(err) if err.is_unauthorized() && !refreshed => {
                    tracing::debug!("access token rejected, attempting refresh");
                    refreshed = true;
                    if let Err(refresh_err) = self.refresh().await {
                        tracing::warn!("token refresh failed: {refresh_err}");
                        return None;
                    }
                }
                Err(err) => {
                    tracing::warn!("authentication check failed: {err}");
                    return None;
                }
            }
        }
    }

    /// Single mutation point for the resolution outcome.
    fn settle(&self, resolved: Option<UserInfo>) -> Session {
        let mut state = self.state.write().expect("session state poisoned");
        match resolved {
            Some(info) => {
                state.is_authenticated = true;
                // admin implies authenticated by construction
                state.is_admin = info.is_admin;
                tracing::debug!(email = %info.email, is_admin = info.is_admin, "session resolved");
            }
            None => {
                state.is_authenticated = false;
                state.is_admin = false;
            }
        }
        state.is_loading = false;
        *state
    }

    /// Ask the server for a fresh access token. Failure propagates
    /// untouched so `check_auth` can settle the session accordingly.
    pub async fn refresh(&self) -> Result<()> {
        let ack: ServerMessage = self.api.post_json::<_, ()>("/refresh", None).await?;
        tracing::debug!("{}", ack.message);
        Ok(())
    }

    /// Establish a session, then revalidate it so the flags come from the
    /// server rather than from an assumed-successful login.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.api
            .post_json::<ServerMessage, _>("/login", Some(&LoginRequest { email, password }))
            .await?;
        Ok(self.check_auth().await)
    }

    /// End the session. Local state resets even when the server call
    /// fails; the user asked to be logged out and the client honors that.
    pub async fn logout(&self) -> Session {
        if let Err(err) = self
            .api
            .post_json::<ServerMessage, ()>("/logout", None)
            .await
        {
            tracing::warn!("logout request failed, clearing local session anyway: {err}");
        }
        // The server only deletes the access cookie; drop both locally.
        self.api.credentials().clear();
        if let Err(err) = self.api.credentials().persist().await {
            tracing::warn!("failed to clear persisted credentials: {err:#}");
        }

        let mut state = self.state.write().expect("session state poisoned");
        state.is_authenticated = false;
        state.is_admin = false;
        *state
    }

    /// Resolve the session and fail if it does not end authenticated.
    /// Service calls go through this so nothing proceeds on a dead session.
    pub async fn require_auth(&self) -> Result<()> {
        let session = self.check_auth().await;
        if session.is_authenticated {
            Ok(())
        } else {
            Err(ClientError::Unauthenticated)
        }
    }

    /// Unblock loading UI for public routes without resolving the session.
    pub fn finish_loading(&self) {
        let mut state = self.state.write().expect("session state poisoned");
        state.is_loading = false;
    }
}
