//! Environment-driven configuration for the server and the client session layer.
//!
//! Every setting has a default except the token signing secret. Values are read
//! through a lookup function so tests can supply their own environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Minimum accepted length of the HS256 signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

fn parse_u64(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        Some(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an unsigned integer, got '{}'", name, v)),
        _ => Ok(None),
    }
}

fn parse_u16(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Result<Option<u16>> {
    match parse_u64(lookup, name)? {
        Some(v) => u16::try_from(v).map(Some).map_err(|_| anyhow!("{} out of range: {}", name, v)),
        None => Ok(None),
    }
}

fn parse_string(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Argon2 cost parameters. Defaults follow the argon2 crate's recommended values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self { memory_kib: argon2::Params::DEFAULT_M_COST, iterations: argon2::Params::DEFAULT_T_COST }
    }
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_host: String,
    pub http_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// When set, users are persisted as JSON under this directory.
    pub data_dir: Option<PathBuf>,
    pub admin: Option<AdminSeed>,
    pub hash_cost: HashCost,
}

impl ServerConfig {
    pub fn new<S: Into<String>>(jwt_secret: S) -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 3000,
            jwt_secret: jwt_secret.into(),
            jwt_issuer: "kbase".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
            data_dir: None,
            admin: None,
            hash_cost: HashCost::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = parse_string(lookup, "KBASE_JWT_SECRET")
            .ok_or_else(|| anyhow!("KBASE_JWT_SECRET is required"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!("KBASE_JWT_SECRET must be at least {} bytes", MIN_SECRET_LEN));
        }
        let mut cfg = Self::new(secret);
        if let Some(h) = parse_string(lookup, "KBASE_HTTP_HOST") { cfg.http_host = h; }
        if let Some(p) = parse_u16(lookup, "KBASE_HTTP_PORT")? { cfg.http_port = p; }
        if let Some(i) = parse_string(lookup, "KBASE_JWT_ISSUER") { cfg.jwt_issuer = i; }
        if let Some(s) = parse_u64(lookup, "KBASE_ACCESS_TTL_SECS")? { cfg.access_ttl = Duration::from_secs(s); }
        if let Some(s) = parse_u64(lookup, "KBASE_REFRESH_TTL_SECS")? { cfg.refresh_ttl = Duration::from_secs(s); }
        cfg.data_dir = parse_string(lookup, "KBASE_DATA_DIR").map(PathBuf::from);
        match (parse_string(lookup, "KBASE_ADMIN_EMAIL"), lookup("KBASE_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) if !password.is_empty() => {
                cfg.admin = Some(AdminSeed { email, password });
            }
            (Some(_), _) => return Err(anyhow!("KBASE_ADMIN_EMAIL requires KBASE_ADMIN_PASSWORD")),
            _ => {}
        }
        if let Some(m) = parse_u64(lookup, "KBASE_ARGON2_MEMORY_KIB")? {
            cfg.hash_cost.memory_kib = u32::try_from(m).map_err(|_| anyhow!("KBASE_ARGON2_MEMORY_KIB out of range"))?;
        }
        if let Some(t) = parse_u64(lookup, "KBASE_ARGON2_ITERATIONS")? {
            cfg.hash_cost.iterations = u32::try_from(t).map_err(|_| anyhow!("KBASE_ARGON2_ITERATIONS out of range"))?;
        }
        if cfg.access_ttl.is_zero() || cfg.refresh_ttl.is_zero() {
            return Err(anyhow!("token lifetimes must be positive"));
        }
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub session_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_millis(30_000),
            session_file: PathBuf::from(".kbase_session.json"),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(u) = parse_string(lookup, "KBASE_API_URL") { cfg.base_url = u; }
        if let Some(ms) = parse_u64(lookup, "KBASE_API_TIMEOUT_MS")? { cfg.timeout = Duration::from_millis(ms); }
        if let Some(f) = parse_string(lookup, "KBASE_SESSION_FILE") { cfg.session_file = PathBuf::from(f); }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn secret_is_required() {
        let err = ServerConfig::from_lookup(&env(&[])).unwrap_err();
        assert!(err.to_string().contains("KBASE_JWT_SECRET"));
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", "short")])).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg = ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.http_port, 3000);
        assert_eq!(cfg.jwt_issuer, "kbase");
        assert_eq!(cfg.access_ttl, Duration::from_secs(900));
        assert_eq!(cfg.refresh_ttl, Duration::from_secs(604_800));
        assert!(cfg.data_dir.is_none());
        assert!(cfg.admin.is_none());
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = ServerConfig::from_lookup(&env(&[
            ("KBASE_JWT_SECRET", SECRET),
            ("KBASE_HTTP_PORT", "8081"),
            ("KBASE_ACCESS_TTL_SECS", "60"),
            ("KBASE_DATA_DIR", "/var/lib/kbase"),
            ("KBASE_ADMIN_EMAIL", "root@corp.example"),
            ("KBASE_ADMIN_PASSWORD", "change-me-now"),
            ("KBASE_ARGON2_MEMORY_KIB", "1024"),
        ]))
        .unwrap();
        assert_eq!(cfg.http_port, 8081);
        assert_eq!(cfg.access_ttl, Duration::from_secs(60));
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/var/lib/kbase")));
        assert_eq!(cfg.admin.as_ref().map(|a| a.email.as_str()), Some("root@corp.example"));
        assert_eq!(cfg.hash_cost.memory_kib, 1024);
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", SECRET), ("KBASE_HTTP_PORT", "99999")])).is_err());
        assert!(ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", SECRET), ("KBASE_ACCESS_TTL_SECS", "soon")])).is_err());
        assert!(ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", SECRET), ("KBASE_ACCESS_TTL_SECS", "0")])).is_err());
    }

    #[test]
    fn admin_email_without_password_is_an_error() {
        assert!(ServerConfig::from_lookup(&env(&[("KBASE_JWT_SECRET", SECRET), ("KBASE_ADMIN_EMAIL", "a@b.co")])).is_err());
    }

    #[test]
    fn client_config_overrides() {
        let cfg = ClientConfig::from_lookup(&env(&[("KBASE_API_URL", "https://kb.corp.example"), ("KBASE_API_TIMEOUT_MS", "500")])).unwrap();
        assert_eq!(cfg.base_url, "https://kb.corp.example");
        assert_eq!(cfg.timeout, Duration::from_millis(500));
        assert_eq!(cfg.session_file, PathBuf::from(".kbase_session.json"));
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
