//!
//! kbase HTTP server
//! -----------------
//! Axum router for the authentication API (`/auth/*`) and the document routes.
//!
//! Responsibilities:
//! - Stateless bearer authentication: access tokens on protected routes, refresh
//!   tokens only on `/auth/refresh`.
//! - Request-id propagation: every response echoes `X-Request-ID`, generated when absent.
//! - Mapping `AppError` to `{"status":"error","code","message"}` bodies in one place.
//! - Running password hashing on the blocking pool.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, info_span, Instrument};

use crate::config::ServerConfig;
use crate::documents::{Document, DocumentPatch, DocumentService, DocumentVersion, MemoryDocumentStore, NewDocument};
use crate::error::{AppError, AppResult};
use crate::identity::{
    bearer_token, AuthResponse, ChangePasswordRequest, CredentialStore, JsonFileCredentialStore, LoginRequest,
    MemoryCredentialStore, PasswordHasher, ProfileUpdate, RefreshResponse, RegisterRequest, RequestContext,
    SessionAuthenticator, TokenIssuer, TokenKind, User,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<SessionAuthenticator>,
    pub tokens: Arc<TokenIssuer>,
    pub documents: Arc<dyn DocumentService>,
}

#[derive(Clone)]
struct RequestId(String);

/// Wire up stores, token issuer and authenticator from configuration, and seed the
/// bootstrap administrator when one is configured. Blocking: hashes passwords.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn CredentialStore> = match &config.data_dir {
        Some(dir) => Arc::new(JsonFileCredentialStore::open(dir)?),
        None => {
            info!(target: "startup", "credential store: in-memory (set KBASE_DATA_DIR to persist users)");
            Arc::new(MemoryCredentialStore::new())
        }
    };
    let tokens = Arc::new(TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        &config.jwt_issuer,
        config.access_ttl,
        config.refresh_ttl,
    )?);
    let hasher = PasswordHasher::new(config.hash_cost)?;
    let auth = Arc::new(SessionAuthenticator::new(store, tokens.clone(), hasher));
    if let Some(seed) = &config.admin {
        auth.ensure_admin(&seed.email, &seed.password)
            .with_context(|| format!("While ensuring bootstrap administrator {}", seed.email))?;
    }
    Ok(AppState { auth, tokens, documents: Arc::new(MemoryDocumentStore::new()) })
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/profile", patch(update_profile))
        .route("/auth/change-password", post(change_password))
        .route("/auth/users/{id}/active", put(set_active))
        .route("/documents", post(create_document))
        .route("/documents/search", get(search_documents))
        .route("/documents/{id}", get(get_document).patch(update_document).delete(delete_document))
        .route("/documents/{id}/versions", get(document_versions))
        .route("/categories/{id}/documents", get(category_documents))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access));

    Router::new()
        .route("/", get(|| async { "kbase ok" }))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .merge(protected)
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

/// Build state, bind, and serve until Ctrl-C.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let state = tokio::task::spawn_blocking(move || build_state(&config))
        .await
        .context("state initialization task failed")??;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
    info!(target: "startup", "HTTP listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(target: "startup", "HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "startup", "failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!(target: "startup", "shutdown requested");
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.is_auth_failure() {
            debug!(target: "auth", code = self.code_str(), "request rejected");
        }
        let body = json!({"status": "error", "code": self.code_str(), "message": self.message()});
        (status, Json(body)).into_response()
    }
}

async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(id.clone()));
    let span = info_span!(target: "http", "request", request_id = %id, method = %req.method(), path = %req.uri().path());
    let started = Instant::now();
    let mut resp = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(target: "http", status = resp.status().as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "request completed");
    });
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

fn presented_token(req: &Request) -> Option<&str> {
    req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(bearer_token)
}

fn missing_token() -> AppError {
    AppError::InvalidSession { message: "Authentication required".into() }
}

/// Bearer gate for protected routes: accepts only unexpired access tokens.
async fn require_access(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let token = presented_token(&req).ok_or_else(missing_token)?;
    let principal = state.tokens.verify(token, TokenKind::Access).map_err(|e| {
        debug!(target: "auth", "access token rejected: {}", e);
        AppError::invalid_session()
    })?;
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone()).unwrap_or_default();
    req.extensions_mut().insert(RequestContext { principal, request_id });
    Ok(next.run(req).await)
}

/// Run an authenticator call on the blocking pool.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::transient(e, "Internal server error"))?
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(|e| AppError::validation(e.body_text()))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let req = body(payload)?;
    let auth = state.auth.clone();
    let out = blocking(move || auth.register(&req)).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let req = body(payload)?;
    let auth = state.auth.clone();
    Ok(Json(blocking(move || auth.login(&req)).await?))
}

/// Accepts only a refresh token as bearer; the account is re-checked before a new
/// access token is minted.
async fn refresh(State(state): State<AppState>, req: Request) -> AppResult<Json<RefreshResponse>> {
    let token = presented_token(&req).ok_or_else(missing_token)?;
    let principal = state.tokens.verify(token, TokenKind::Refresh).map_err(|e| {
        debug!(target: "auth", "refresh token rejected: {}", e);
        AppError::invalid_session()
    })?;
    let auth = state.auth.clone();
    Ok(Json(blocking(move || auth.refresh(&principal.subject)).await?))
}

/// Tokens are stateless; logout is an acknowledgement so clients can clear local state.
async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `null` when the account no longer exists or is inactive.
async fn me(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> AppResult<Json<Option<User>>> {
    let auth = state.auth.clone();
    let id = ctx.user_id().to_string();
    let user = tokio::task::spawn_blocking(move || auth.validate(&id))
        .await
        .map_err(|e| AppError::transient(e, "Failed to load user"))?;
    Ok(Json(user))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> AppResult<Json<User>> {
    let patch = body(payload)?;
    let auth = state.auth.clone();
    Ok(Json(blocking(move || auth.update_profile(ctx.user_id(), &patch)).await?))
}

async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<StatusCode> {
    let req = body(payload)?;
    let auth = state.auth.clone();
    let request_id = ctx.request_id.clone();
    let user_id = ctx.user_id().to_string();
    blocking(move || auth.change_password(ctx.user_id(), &req)).await?;
    info!(target: "auth", request_id = %request_id, user_id = %user_id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ActivePayload {
    active: bool,
}

async fn set_active(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    payload: Result<Json<ActivePayload>, JsonRejection>,
) -> AppResult<Json<User>> {
    let active = body(payload)?.active;
    let auth = state.auth.clone();
    let request_id = ctx.request_id.clone();
    let user = blocking(move || auth.set_active(&ctx.principal, &id, active)).await?;
    info!(target: "auth", request_id = %request_id, user_id = %user.id, active, "account activation changed");
    Ok(Json(user))
}

async fn create_document(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<NewDocument>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Document>)> {
    let doc = state.documents.create(ctx.user_id(), body(payload)?)?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search_documents(State(state): State<AppState>, Query(params): Query<SearchParams>) -> AppResult<Json<Vec<Document>>> {
    Ok(Json(state.documents.search(&params.q)?))
}

async fn get_document(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Document>> {
    Ok(Json(state.documents.find(&id)?))
}

async fn update_document(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    payload: Result<Json<DocumentPatch>, JsonRejection>,
) -> AppResult<Json<Document>> {
    Ok(Json(state.documents.update(ctx.user_id(), &id, body(payload)?)?))
}

async fn delete_document(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.documents.delete(ctx.user_id(), &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn document_versions(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Vec<DocumentVersion>>> {
    Ok(Json(state.documents.version_history(&id)?))
}

async fn category_documents(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Vec<Document>>> {
    Ok(Json(state.documents.list_by_category(&id)?))
}
