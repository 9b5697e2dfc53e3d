//! End-to-end tests: a real server on an ephemeral port, driven by the reqwest
//! transport and the client session manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::tempdir;

use kbase::client::{ApiClient, ClientSessionManager, FileStorage, HttpTransport, SessionContext, SessionData, SessionStorage};
use kbase::config::{AdminSeed, HashCost, ServerConfig};
use kbase::documents::{Document, DocumentPatch, NewDocument};
use kbase::identity::{LoginRequest, RegisterRequest, Role, User};
use kbase::server::{build_state, router};

const SECRET: &str = "integration-secret-0123456789-abcdefghij";
const ADMIN_EMAIL: &str = "root@corp.example";
const ADMIN_PASSWORD: &str = "root-password";

async fn spawn_server(data_dir: Option<PathBuf>) -> Result<String> {
    spawn_server_at(data_dir, None).await
}

/// `prefix` mounts the API below a path, as behind a reverse proxy.
async fn spawn_server_at(data_dir: Option<PathBuf>, prefix: Option<&str>) -> Result<String> {
    let mut cfg = ServerConfig::new(SECRET);
    cfg.hash_cost = HashCost { memory_kib: 1024, iterations: 1 };
    cfg.data_dir = data_dir;
    cfg.admin = Some(AdminSeed { email: ADMIN_EMAIL.into(), password: ADMIN_PASSWORD.into() });
    let state = build_state(&cfg)?;
    let app = match prefix {
        Some(p) => axum::Router::new().nest(p, router(state)),
        None => router(state),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}{}", addr, prefix.unwrap_or("")))
}

fn manager(base: &str) -> Result<ClientSessionManager> {
    let transport = Arc::new(HttpTransport::new(base, Duration::from_secs(5))?);
    let session = SessionContext::in_memory();
    Ok(ClientSessionManager::new(Arc::new(ApiClient::new(transport, session))))
}

fn register_req(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.into(),
        name: "Ann".into(),
        password: "correct-horse".into(),
        department: None,
        position: None,
    }
}

fn login_req(email: &str, password: &str) -> LoginRequest {
    LoginRequest { email: email.into(), password: password.into() }
}

#[tokio::test]
async fn register_then_login_returns_same_user() -> Result<()> {
    let base = spawn_server(None).await?;
    let http = reqwest::Client::new();
    let resp = http.post(format!("{}/auth/register", base)).json(&register_req("a@x.com")).send().await?;
    assert_eq!(resp.status().as_u16(), 201);
    let body: Value = resp.json().await?;
    assert_eq!(body["user"]["email"], "a@x.com");
    assert!(body["user"].get("passwordHash").is_none());
    assert!(!body["accessToken"].as_str().unwrap_or_default().is_empty());
    let registered_id = body["user"]["id"].as_str().unwrap().to_string();

    let m = manager(&base)?;
    let user = m.login(&login_req("a@x.com", "correct-horse")).await?;
    assert_eq!(user.id, registered_id);
    assert!(m.is_authenticated());
    assert!(!m.is_loading());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_with_other_casing_conflicts() -> Result<()> {
    let base = spawn_server(None).await?;
    let m = manager(&base)?;
    m.register(&register_req("a@x.com")).await?;

    let other = manager(&base)?;
    let err = other.register(&register_req("A@X.COM")).await.unwrap_err();
    assert_eq!(err.status, 409);
    assert_eq!(err.code.as_deref(), Some("duplicate_account"));
    assert_eq!(other.error().as_deref(), Some("User with this email already exists"));
    assert!(!other.is_authenticated());
    assert!(!other.is_loading());
    Ok(())
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() -> Result<()> {
    let base = spawn_server(None).await?;
    manager(&base)?.register(&register_req("a@x.com")).await?;

    let m = manager(&base)?;
    let wrong = m.login(&login_req("a@x.com", "not-the-password")).await.unwrap_err();
    let unknown = m.login(&login_req("ghost@x.com", "correct-horse")).await.unwrap_err();
    assert_eq!(wrong, unknown);
    assert_eq!(wrong.status, 401);
    assert_eq!(wrong.message, "Invalid credentials");
    Ok(())
}

#[tokio::test]
async fn me_accepts_only_access_tokens() -> Result<()> {
    let base = spawn_server(None).await?;
    let http = reqwest::Client::new();
    let body: Value = http.post(format!("{}/auth/register", base)).json(&register_req("a@x.com")).send().await?.json().await?;
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let anon = http.get(format!("{}/auth/me", base)).send().await?;
    assert_eq!(anon.status().as_u16(), 401);
    let err: Value = anon.json().await?;
    assert_eq!(err["status"], "error");
    assert_eq!(err["code"], "invalid_session");

    let wrong_kind = http.get(format!("{}/auth/me", base)).bearer_auth(&refresh).send().await?;
    assert_eq!(wrong_kind.status().as_u16(), 401);

    let ok = http.get(format!("{}/auth/me", base)).bearer_auth(&access).send().await?;
    assert_eq!(ok.status().as_u16(), 200);
    let me: User = ok.json().await?;
    assert_eq!(me.email, "a@x.com");

    let refreshed = http.post(format!("{}/auth/refresh", base)).bearer_auth(&access).send().await?;
    assert_eq!(refreshed.status().as_u16(), 401);
    Ok(())
}

#[tokio::test]
async fn deactivation_reaches_refresh_me_and_login() -> Result<()> {
    let base = spawn_server(None).await?;
    let http = reqwest::Client::new();
    let body: Value = http.post(format!("{}/auth/register", base)).json(&register_req("a@x.com")).send().await?.json().await?;
    let user_id = body["user"]["id"].as_str().unwrap().to_string();
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();

    let ok = http.post(format!("{}/auth/refresh", base)).bearer_auth(&refresh).send().await?;
    assert_eq!(ok.status().as_u16(), 200);
    let fresh: Value = ok.json().await?;
    assert!(fresh["accessToken"].as_str().is_some_and(|t| !t.is_empty()));

    // a plain user may not deactivate anyone
    let denied = http
        .put(format!("{}/auth/users/{}/active", base, user_id))
        .bearer_auth(&access)
        .json(&json!({"active": false}))
        .send()
        .await?;
    assert_eq!(denied.status().as_u16(), 403);

    let admin = manager(&base)?;
    let root = admin.login(&login_req(ADMIN_EMAIL, ADMIN_PASSWORD)).await?;
    assert_eq!(root.role, Role::SuperAdmin);
    assert!(admin.has_permission("users.deactivate"));
    let updated: User = admin.api().put(&format!("/auth/users/{}/active", user_id), Some(json!({"active": false}))).await?;
    assert!(!updated.active);

    let rejected = http.post(format!("{}/auth/refresh", base)).bearer_auth(&refresh).send().await?;
    assert_eq!(rejected.status().as_u16(), 401);
    let err: Value = rejected.json().await?;
    assert_eq!(err["code"], "invalid_session");

    let me = http.get(format!("{}/auth/me", base)).bearer_auth(&access).send().await?;
    assert_eq!(me.status().as_u16(), 200);
    assert_eq!(me.json::<Value>().await?, Value::Null);

    let err = manager(&base)?.login(&login_req("a@x.com", "correct-horse")).await.unwrap_err();
    assert_eq!(err.code.as_deref(), Some("account_deactivated"));
    Ok(())
}

#[tokio::test]
async fn rejected_access_token_is_refreshed_transparently() -> Result<()> {
    let base = spawn_server(None).await?;
    let m = manager(&base)?;
    let user = m.register(&register_req("a@x.com")).await?;

    let session = m.session();
    assert!(session.replace_access_token(session.generation(), "not-a-valid-token".into()));
    let me: Option<User> = m.api().get("/auth/me").await?;
    assert_eq!(me.map(|u| u.id), Some(user.id));
    assert_ne!(session.access_token().as_deref(), Some("not-a-valid-token"));
    Ok(())
}

#[tokio::test]
async fn logout_twice_matches_logout_once() -> Result<()> {
    let base = spawn_server(None).await?;
    let m = manager(&base)?;
    m.register(&register_req("a@x.com")).await?;

    m.logout().await;
    let once = m.snapshot();
    m.logout().await;
    assert_eq!(m.snapshot(), once);
    assert!(!once.is_authenticated);
    assert!(once.user.is_none());
    assert!(m.session().access_token().is_none());
    Ok(())
}

#[tokio::test]
async fn check_auth_with_server_down_is_silent() -> Result<()> {
    let dead = {
        let l = std::net::TcpListener::bind("127.0.0.1:0")?;
        format!("http://{}", l.local_addr()?)
    };
    let dir = tempdir()?;
    let storage = Arc::new(FileStorage::new(dir.path().join("session.json")));
    storage.save(&SessionData { access_token: Some("stale".into()), is_authenticated: true, ..Default::default() })?;

    let transport = Arc::new(HttpTransport::new(&dead, Duration::from_secs(2))?);
    let session = SessionContext::new(storage.clone());
    let m = ClientSessionManager::new(Arc::new(ApiClient::new(transport, session)));
    assert!(m.is_authenticated());
    assert!(!m.check_auth().await);
    assert!(!m.is_authenticated());
    assert!(m.error().is_none());
    assert!(!m.is_loading());
    assert!(storage.load()?.is_none());
    Ok(())
}

#[tokio::test]
async fn only_author_can_edit_documents() -> Result<()> {
    let base = spawn_server(None).await?;
    let alice = manager(&base)?;
    alice.register(&register_req("alice@x.com")).await?;
    let bob = manager(&base)?;
    bob.register(&register_req("bob@x.com")).await?;

    let draft = NewDocument { title: "Retention".into(), content: "Keep seven years".into(), category_id: Some("legal".into()), tags: vec!["policy".into()] };
    let doc: Document = alice.api().post("/documents", Some(serde_json::to_value(&draft)?)).await?;

    let patch = serde_json::to_value(DocumentPatch { content: Some("Keep forever".into()), ..Default::default() })?;
    let err = bob.api().patch::<Document>(&format!("/documents/{}", doc.id), Some(patch.clone())).await.unwrap_err();
    assert_eq!(err.status, 403);
    assert_eq!(err.message, "You do not have permission to perform this action");

    let updated: Document = alice.api().patch(&format!("/documents/{}", doc.id), Some(patch)).await?;
    assert_eq!(updated.version, 2);
    let hits: Vec<Document> = bob.api().get("/documents/search?q=retention").await?;
    assert_eq!(hits.len(), 1);
    let missing = bob.api().get::<Document>("/documents/nope").await.unwrap_err();
    assert_eq!(missing.message, "Resource not found");
    Ok(())
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() -> Result<()> {
    let base = spawn_server(None).await?;
    let http = reqwest::Client::new();
    let echoed = http.get(&base).header("X-Request-ID", "trace-123").send().await?;
    assert_eq!(echoed.headers().get("x-request-id").and_then(|v| v.to_str().ok()), Some("trace-123"));
    let generated = http.post(format!("{}/auth/logout", base)).send().await?;
    assert_eq!(generated.status().as_u16(), 204);
    assert!(generated.headers().get("x-request-id").is_some_and(|v| !v.is_empty()));
    Ok(())
}

#[tokio::test]
async fn file_backed_users_survive_restart() -> Result<()> {
    let dir = tempdir()?;
    let first = spawn_server(Some(dir.path().to_path_buf())).await?;
    let reg = manager(&first)?.register(&register_req("keep@x.com")).await?;

    let second = spawn_server(Some(dir.path().to_path_buf())).await?;
    let user = manager(&second)?.login(&login_req("KEEP@x.com", "correct-horse")).await?;
    assert_eq!(user.id, reg.id);
    Ok(())
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() -> Result<()> {
    let base = spawn_server_at(None, Some("/api")).await?;
    assert!(base.ends_with("/api"));
    let m = manager(&base)?;
    let user = m.register(&register_req("prefixed@x.com")).await?;
    let me: Option<User> = m.api().get("/auth/me").await?;
    assert_eq!(me.map(|u| u.id), Some(user.id));
    Ok(())
}
