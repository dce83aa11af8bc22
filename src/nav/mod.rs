//! Navigation guard: the gate in front of every view transition.
//!
//! The guard is a pure decision function over the route table; whoever
//! drives the views (TUI screens, a web shell) performs the actual
//! redirect. First-run detection runs before anything else so a fresh
//! install always lands on the setup view.

use crate::api::ApiClient;
use crate::auth::SessionManager;
use serde::Deserialize;

/// The client's view routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Start,
    Home,
    Chat,
    LoadingChat,
    Login,
    ResetPassword,
    SetNewPassword,
    Register,
    AdminConsole,
    ChatHistory,
    Collections,
    CollectionDetail,
    NewCollection,
    Settings,
}

impl Route {
    /// Routes reachable without an authenticated session.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Route::Login | Route::Register | Route::ResetPassword | Route::Start
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Route::Start => "start",
            Route::Home => "home",
            Route::Chat => "chat",
            Route::LoadingChat => "loading-chat",
            Route::Login => "login",
            Route::ResetPassword => "reset-password",
            Route::SetNewPassword => "new-password",
            Route::Register => "register",
            Route::AdminConsole => "admin-console",
            Route::ChatHistory => "chat-history",
            Route::Collections => "collections",
            Route::CollectionDetail => "collection-detail",
            Route::NewCollection => "new-collection",
            Route::Settings => "settings",
        }
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDecision {
    Allow,
    Redirect(Route),
}

#[derive(Debug, Deserialize)]
struct FirstUserStatus {
    #[serde(default)]
    has_users: bool,
    #[serde(default)]
    has_invites: bool,
    is_first_user: bool,
}

#[derive(Debug, Clone)]
pub struct NavigationGuard {
    api: ApiClient,
    session: SessionManager,
}

impl NavigationGuard {
    pub fn new(api: ApiClient, session: SessionManager) -> Self {
        Self { api, session }
    }

    /// Decide whether navigating to `target` may proceed.
    ///
    /// Order matters: first-run detection runs for every target except
    /// the registration view (invite links must keep working before any
    /// admin exists), then public routes pass through, then protected
    /// routes resolve the session. A protected route never renders with
    /// an unresolved session: by the time `Allow` comes back,
    /// `check_auth` has cleared `is_loading`.
    pub async fn before_each(&self, target: Route) -> NavDecision {
        if target != Route::Register {
            match self
                .api
                .get_json::<FirstUserStatus>("/check-first-user", false)
                .await
            {
                Ok(status) if status.is_first_user => {
                    tracing::debug!(
                        has_users = status.has_users,
                        has_invites = status.has_invites,
                        "first-run detected"
                    );
                    // Allow-through when already headed to setup, else
                    // force it; anything else would loop.
                    if target == Route::Start {
                        return NavDecision::Allow;
                    }
                    return NavDecision::Redirect(Route::Start);
                }
                Ok(_) => {}
                Err(err) => {
                    // Fail open: a transient blip must not lock out
                    // every route.
                    tracing::warn!("first-run check failed, continuing: {err}");
                }
            }
        }

        if target.is_public() {
            self.session.finish_loading();
            return NavDecision::Allow;
        }

        let session = self.session.check_auth().await;
        if session.is_authenticated {
            NavDecision::Allow
        } else {
            NavDecision::Redirect(Route::Login)
        }
    }
}
