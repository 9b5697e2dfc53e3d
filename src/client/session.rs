//! Client session manager: the session as the front end sees it.
//!
//! Wraps the API client with user-facing state (current user, loading flag, last
//! error) and the login / logout / current-user flows.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::{SessionContext, SessionEvent, SessionPhase};
use super::interceptor::{ApiClient, ApiError, Auth};
use crate::identity::{
    has_permission, has_role, AuthResponse, ChangePasswordRequest, LoginRequest, ProfileUpdate, RegisterRequest, Role,
    User,
};

/// Capabilities the server does not offer yet report this instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability<T> {
    Available(T),
    Unsupported { feature: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub phase: SessionPhase,
}

#[derive(Default)]
struct UiState {
    is_loading: bool,
    error: Option<String>,
}

pub struct ClientSessionManager {
    api: Arc<ApiClient>,
    session: Arc<SessionContext>,
    ui: RwLock<UiState>,
}

fn encode<T: Serialize>(v: &T) -> Result<Value, ApiError> {
    serde_json::to_value(v).map_err(|e| ApiError::new(0, "invalid_request", e.to_string()))
}

impl ClientSessionManager {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let session = api.session().clone();
        Self { api, session, ui: RwLock::new(UiState::default()) }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let ui = self.ui.read();
        let data = self.session.snapshot();
        SessionSnapshot {
            user: data.user,
            is_authenticated: data.is_authenticated,
            is_loading: ui.is_loading,
            error: ui.error.clone(),
            phase: self.session.phase(),
        }
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.ui.read().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.ui.read().error.clone()
    }

    pub fn clear_error(&self) {
        self.ui.write().error = None;
    }

    fn begin(&self) {
        let mut ui = self.ui.write();
        ui.is_loading = true;
        ui.error = None;
    }

    fn done(&self, error: Option<String>) {
        let mut ui = self.ui.write();
        ui.is_loading = false;
        ui.error = error;
    }

    pub async fn login(&self, creds: &LoginRequest) -> Result<User, ApiError> {
        let body = encode(creds)?;
        self.authenticate("/auth/login", body, "Login failed").await
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ApiError> {
        let body = encode(req)?;
        self.authenticate("/auth/register", body, "Registration failed").await
    }

    async fn authenticate(&self, path: &str, body: Value, fallback: &str) -> Result<User, ApiError> {
        self.begin();
        self.session.set_phase(SessionPhase::Authenticating);
        match self.api.call::<AuthResponse>(Method::POST, path, Some(body), Auth::Anonymous).await {
            Ok(resp) => {
                let user = resp.user.clone();
                self.session.establish(resp.user, resp.access_token, Some(resp.refresh_token));
                self.done(None);
                info!(target: "client", user_id = %user.id, "signed in");
                Ok(user)
            }
            Err(e) => {
                self.session.clear(SessionEvent::LoggedOut);
                let msg = if e.message.is_empty() { fallback.to_string() } else { e.message.clone() };
                self.done(Some(msg));
                Err(e)
            }
        }
    }

    /// Tell the server (best effort), then drop local state unconditionally.
    pub async fn logout(&self) {
        self.ui.write().is_loading = true;
        if self.session.access_token().is_some() {
            if let Err(e) = self.api.call::<Value>(Method::POST, "/auth/logout", None, Auth::Anonymous).await {
                warn!(target: "client", "logout notification failed: {}", e);
            }
        }
        self.session.clear(SessionEvent::LoggedOut);
        self.done(None);
    }

    /// Memory, then the persisted snapshot, then `GET /auth/me`.
    async fn resolve_user(&self) -> Result<Option<User>, ApiError> {
        if let Some(u) = self.session.user() {
            return Ok(Some(u));
        }
        if self.session.reload() {
            if let Some(u) = self.session.user() {
                debug!(target: "client", "user restored from stored session");
                return Ok(Some(u));
            }
        }
        if self.session.access_token().is_none() {
            return Ok(None);
        }
        match self.api.get::<Option<User>>("/auth/me").await? {
            Some(u) => {
                self.session.set_user(u.clone());
                Ok(Some(u))
            }
            None => {
                self.session.clear(SessionEvent::LoggedOut);
                Ok(None)
            }
        }
    }

    /// `None` on any failure.
    pub async fn get_current_user(&self) -> Option<User> {
        match self.resolve_user().await {
            Ok(u) => u,
            Err(e) => {
                debug!(target: "client", "current user unavailable: {}", e);
                None
            }
        }
    }

    /// Resolve the session at startup. Never surfaces an error message.
    pub async fn check_auth(&self) -> bool {
        self.begin();
        let ok = match self.resolve_user().await {
            Ok(Some(_)) => true,
            Ok(None) => {
                self.session.clear(SessionEvent::LoggedOut);
                false
            }
            Err(e) => {
                debug!(target: "client", "session check failed: {}", e);
                self.session.clear(SessionEvent::LoggedOut);
                false
            }
        };
        self.done(None);
        ok
    }

    /// Re-resolve the user if a session is believed to exist; failures are surfaced.
    pub async fn refresh_auth(&self) -> Result<(), ApiError> {
        if !self.session.is_authenticated() {
            return Ok(());
        }
        self.begin();
        match self.resolve_user().await {
            Ok(Some(_)) => {
                self.done(None);
                Ok(())
            }
            Ok(None) => {
                self.session.clear(SessionEvent::LoggedOut);
                self.done(None);
                Ok(())
            }
            Err(e) => {
                self.session.clear(SessionEvent::LoggedOut);
                self.done(Some(e.message.clone()));
                Err(e)
            }
        }
    }

    /// Merge into the cached user only; nothing is sent.
    pub fn update_user(&self, patch: &ProfileUpdate) {
        if let Some(mut u) = self.session.user() {
            patch.apply_to_user(&mut u);
            self.session.set_user(u);
        }
    }

    pub async fn update_profile(&self, patch: &ProfileUpdate) -> Result<User, ApiError> {
        let body = encode(patch)?;
        let user: User = self.api.patch("/auth/profile", Some(body)).await?;
        self.session.set_user(user.clone());
        Ok(user)
    }

    pub async fn change_password(&self, req: &ChangePasswordRequest) -> Result<(), ApiError> {
        let body = encode(req)?;
        self.api.post::<Value>("/auth/change-password", Some(body)).await?;
        Ok(())
    }

    pub fn enable_mfa(&self, _code: &str) -> Availability<()> {
        Availability::Unsupported { feature: "mfa" }
    }

    pub fn disable_mfa(&self, _code: &str) -> Availability<()> {
        Availability::Unsupported { feature: "mfa" }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.session.user().is_some_and(|u| has_role(&u, role))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.session.user().is_some_and(|u| has_permission(&u, permission))
    }
}
