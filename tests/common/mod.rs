//! Scripted in-process transport shared by the client-side test suites.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use kbase::client::{ApiClient, ApiRequest, ApiResponse, SessionContext, Transport, TransportError, REFRESH_PATH};
use kbase::identity::{Profile, Role, User};

/// Accepts exactly one access token at a time. `/auth/refresh` mints the next one.
/// Paths in `routes` answer with a fixed reply regardless of the token.
pub struct ScriptedTransport {
    pub valid: Mutex<String>,
    pub refresh_ok: AtomicBool,
    pub always_unauthorized: AtomicBool,
    pub refresh_delay: Duration,
    pub refresh_calls: AtomicUsize,
    pub log: Mutex<Vec<ApiRequest>>,
    pub routes: Mutex<HashMap<String, Result<ApiResponse, TransportError>>>,
    /// `/hold` parks until `release` is notified, then answers 401.
    pub arrived: Notify,
    pub release: Notify,
}

impl ScriptedTransport {
    pub fn new(valid: &str) -> Arc<Self> {
        Arc::new(Self {
            valid: Mutex::new(valid.to_string()),
            refresh_ok: AtomicBool::new(true),
            always_unauthorized: AtomicBool::new(false),
            refresh_delay: Duration::from_millis(50),
            refresh_calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn route(&self, path: &str, reply: Result<ApiResponse, TransportError>) {
        self.routes.lock().insert(path.to_string(), reply);
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.log.lock().iter().filter(|r| r.path == path).cloned().collect()
    }
}

fn unauthorized() -> ApiResponse {
    ApiResponse::new(401, Some(json!({"status": "error", "code": "invalid_session", "message": "Invalid session"})))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.log.lock().push(req.clone());
        if let Some(reply) = self.routes.lock().get(&req.path).cloned() {
            return reply;
        }
        if req.path == REFRESH_PATH {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.refresh_delay).await;
            if !self.refresh_ok.load(Ordering::SeqCst) {
                return Ok(unauthorized());
            }
            let token = format!("access-{}", n);
            *self.valid.lock() = token.clone();
            return Ok(ApiResponse::new(200, Some(json!({"accessToken": token}))));
        }
        if req.path == "/hold" {
            self.arrived.notify_one();
            self.release.notified().await;
            return Ok(unauthorized());
        }
        let valid = self.valid.lock().clone();
        if self.always_unauthorized.load(Ordering::SeqCst) || req.bearer.as_deref() != Some(valid.as_str()) {
            return Ok(unauthorized());
        }
        let payload: Value = json!({"path": req.path, "token": req.bearer});
        Ok(ApiResponse::new(200, Some(json!({"data": payload}))))
    }
}

pub fn user(id: &str, role: Role) -> User {
    let now = chrono::Utc::now();
    User {
        id: id.to_string(),
        email: format!("{}@corp.example", id),
        name: id.to_string(),
        role,
        active: true,
        profile: Profile::default(),
        created_at: now,
        updated_at: now,
    }
}

/// Client with an established session holding `access` and an optional refresh token.
pub fn signed_in(transport: &Arc<ScriptedTransport>, access: &str, refresh: Option<&str>) -> (Arc<ApiClient>, Arc<SessionContext>) {
    let session = SessionContext::in_memory();
    session.establish(user("u1", Role::User), access.to_string(), refresh.map(str::to_string));
    let api = Arc::new(ApiClient::new(transport.clone(), session.clone()));
    (api, session)
}
