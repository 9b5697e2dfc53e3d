//! Request pipeline: bearer tagging, silent refresh on 401, error normalization.
//!
//! A request that comes back 401 is retried at most once. Before the retry the
//! client refreshes its access token; concurrent failures with the same stale token
//! share one refresh through `refresh_lock`. If the session was cleared while the
//! request was in flight it is not retried at all.

use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::{SessionContext, SessionEvent};
use super::transport::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::identity::RefreshResponse;

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Client-side error shape shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    /// HTTP status; 0 when no response was received.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: u16, code: &str, message: S) -> Self {
        Self { message: message.into(), status, code: Some(code.to_string()), details: None }
    }

    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::new(0, "timeout", "Request timeout. Please check your connection"),
            TransportError::Network(_) => Self::new(0, "network_error", "Network error. Please check your connection"),
        }
    }

    pub fn from_response(resp: &ApiResponse) -> Self {
        let field = |k: &str| resp.body.as_ref().and_then(|b| b.get(k));
        let text = |k: &str| field(k).and_then(Value::as_str).map(str::to_string);
        let message = match resp.status {
            404 => "Resource not found".to_string(),
            403 => "You do not have permission to perform this action".to_string(),
            500 => "Server error. Please try again later".to_string(),
            _ => text("message").unwrap_or_else(|| "An unexpected error occurred".to_string()),
        };
        Self { message, status: resp.status, code: text("code"), details: field("details").cloned() }
    }

    pub fn login_required() -> Self {
        Self::new(401, "login_required", "Session expired. Please log in again")
    }

    pub fn session_ended() -> Self {
        Self::new(401, "session_ended", "Session ended")
    }

    fn invalid_response(err: impl std::fmt::Display) -> Self {
        Self { details: Some(Value::String(err.to_string())), ..Self::new(0, "invalid_response", "An unexpected error occurred") }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// No response arrived (timeout or connection failure).
    pub fn is_network(&self) -> bool {
        self.status == 0 && matches!(self.code.as_deref(), Some("timeout") | Some("network_error"))
    }
}

/// Whether a call carries the session's access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Bearer,
    /// Login, register and similar calls: no token, and a 401 is final.
    Anonymous,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionContext>) -> Self {
        Self { transport, session, refresh_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(Method::GET, path, None, Auth::Bearer).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ApiError> {
        self.call(Method::POST, path, body, Auth::Bearer).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ApiError> {
        self.call(Method::PUT, path, body, Auth::Bearer).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ApiError> {
        self.call(Method::PATCH, path, body, Auth::Bearer).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(Method::DELETE, path, None, Auth::Bearer).await
    }

    pub async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>, auth: Auth) -> Result<T, ApiError> {
        let value = self.execute(method, path, body, auth).await?;
        serde_json::from_value(value).map_err(ApiError::invalid_response)
    }

    /// Run several authenticated requests concurrently; results keep input order.
    pub async fn batch(&self, requests: Vec<BatchRequest>) -> Vec<Result<Value, ApiError>> {
        join_all(requests.into_iter().map(|r| async move { self.execute(r.method, &r.path, r.body, Auth::Bearer).await })).await
    }

    /// Send one request through the pipeline and return the (unwrapped) JSON body.
    pub async fn execute(&self, method: Method, path: &str, body: Option<Value>, auth: Auth) -> Result<Value, ApiError> {
        let generation = self.session.generation();
        let bearer = match auth {
            Auth::Bearer => self.session.access_token(),
            Auth::Anonymous => None,
        };
        let first = self.send(&method, path, &body, bearer.clone()).await?;
        if first.status != 401 || auth == Auth::Anonymous {
            return finish(first);
        }
        if self.session.generation() != generation {
            debug!(target: "client", "{} {} rejected after the session changed; not retrying", method, path);
            return Err(ApiError::from_response(&first));
        }
        let fresh = self.refresh_for(bearer.as_deref(), generation).await?;
        let second = self.send(&method, path, &body, Some(fresh)).await?;
        if second.status == 401 {
            warn!(target: "client", "{} {} still unauthorized after refresh; ending session", method, path);
            self.session.clear_if(generation, SessionEvent::LoginRequired);
            return Err(ApiError::from_response(&second));
        }
        finish(second)
    }

    /// Obtain an access token newer than `stale`, refreshing at most once for all
    /// callers that failed with the same token.
    async fn refresh_for(&self, stale: Option<&str>, generation: u64) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        if self.session.generation() != generation {
            return Err(ApiError::session_ended());
        }
        if let Some(current) = self.session.access_token() {
            if Some(current.as_str()) != stale {
                return Ok(current);
            }
        }
        let Some(refresh_token) = self.session.refresh_token() else {
            self.session.clear_if(generation, SessionEvent::LoginRequired);
            return Err(ApiError::login_required());
        };
        if !self.session.begin_refresh(generation) {
            return Err(ApiError::session_ended());
        }
        let outcome = self.send(&Method::POST, REFRESH_PATH, &None, Some(refresh_token)).await;
        let resp = match outcome {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                warn!(target: "client", status = resp.status, "token refresh rejected; ending session");
                self.session.clear_if(generation, SessionEvent::LoginRequired);
                return Err(ApiError::from_response(&resp));
            }
            Err(e) => {
                warn!(target: "client", "token refresh failed: {}; ending session", e);
                self.session.clear_if(generation, SessionEvent::LoginRequired);
                return Err(e);
            }
        };
        let parsed = unwrap_data(resp.body)
            .ok_or_else(|| ApiError::invalid_response("empty refresh response"))
            .and_then(|v| serde_json::from_value::<RefreshResponse>(v).map_err(ApiError::invalid_response));
        let token = match parsed {
            Ok(r) => r.access_token,
            Err(e) => {
                self.session.clear_if(generation, SessionEvent::LoginRequired);
                return Err(e);
            }
        };
        if !self.session.replace_access_token(generation, token.clone()) {
            return Err(ApiError::session_ended());
        }
        info!(target: "client", "access token refreshed");
        Ok(token)
    }

    async fn send(&self, method: &Method, path: &str, body: &Option<Value>, bearer: Option<String>) -> Result<ApiResponse, ApiError> {
        let req = ApiRequest {
            method: method.clone(),
            path: path.to_string(),
            body: body.clone(),
            bearer,
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        debug!(target: "client", request_id = %req.request_id, "{} {}", method, path);
        let request_id = req.request_id.clone();
        self.transport.send(req).await.map_err(|e| {
            warn!(target: "client", request_id = %request_id, "{} {} failed: {}", method, path, e);
            ApiError::from_transport(&e)
        })
    }
}

fn finish(resp: ApiResponse) -> Result<Value, ApiError> {
    if resp.is_success() {
        Ok(unwrap_data(resp.body).unwrap_or(Value::Null))
    } else {
        Err(ApiError::from_response(&resp))
    }
}

/// `{data: ...}` envelopes are unwrapped to their payload.
fn unwrap_data(body: Option<Value>) -> Option<Value> {
    match body {
        Some(Value::Object(mut map)) if map.contains_key("data") => map.remove("data"),
        other => other,
    }
}
