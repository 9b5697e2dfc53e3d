//! Credential store: where user rows live.
//!
//! The authenticator only talks to the `CredentialStore` trait. Two backends ship:
//! a process-local map, and the same map mirrored to a JSON file after every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::user::{normalize_email, NewUser, ProfileUpdate, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait CredentialStore: Send + Sync {
    fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;
    fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>>;
    /// Fails with `DuplicateEmail` when the normalized email is taken.
    fn insert(&self, new: NewUser) -> StoreResult<UserRecord>;
    fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Option<UserRecord>>;
    fn set_password_hash(&self, id: &str, hash: &str) -> StoreResult<Option<UserRecord>>;
    fn set_active(&self, id: &str, active: bool) -> StoreResult<Option<UserRecord>>;
}

#[derive(Default, Clone)]
struct Tables {
    by_id: HashMap<String, UserRecord>,
    email_index: HashMap<String, String>,
}

impl Tables {
    fn insert(&mut self, new: NewUser) -> StoreResult<UserRecord> {
        let email = normalize_email(&new.email);
        if self.email_index.contains_key(&email) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = Utc::now();
        let rec = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash: new.password_hash,
            name: new.name,
            role: new.role,
            active: true,
            profile: new.profile,
            created_at: now,
            updated_at: now,
        };
        self.email_index.insert(email, rec.id.clone());
        self.by_id.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    fn mutate(&mut self, id: &str, f: impl FnOnce(&mut UserRecord)) -> Option<UserRecord> {
        let rec = self.by_id.get_mut(id)?;
        f(rec);
        rec.updated_at = Utc::now();
        Some(rec.clone())
    }

    fn load(rows: Vec<UserRecord>) -> Self {
        let mut t = Tables::default();
        for r in rows {
            t.email_index.insert(normalize_email(&r.email), r.id.clone());
            t.by_id.insert(r.id.clone(), r);
        }
        t
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.tables.read().by_id.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl CredentialStore for MemoryCredentialStore {
    fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let t = self.tables.read();
        Ok(t.email_index.get(&normalize_email(email)).and_then(|id| t.by_id.get(id)).cloned())
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.read().by_id.get(id).cloned())
    }

    fn insert(&self, new: NewUser) -> StoreResult<UserRecord> {
        self.tables.write().insert(new)
    }

    fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.write().mutate(id, |r| update.apply(r)))
    }

    fn set_password_hash(&self, id: &str, hash: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.write().mutate(id, |r| r.password_hash = hash.to_string()))
    }

    fn set_active(&self, id: &str, active: bool) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.write().mutate(id, |r| r.active = active))
    }
}

/// Same semantics as the memory store; every successful write rewrites `users.json`.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl JsonFileCredentialStore {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating data dir {}", dir.display()))?;
        let path = dir.join("users.json");
        let rows: Vec<UserRecord> = if path.exists() {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            if raw.trim().is_empty() { Vec::new() } else {
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
        } else { Vec::new() };
        info!(target: "startup", "credential store: {} users loaded from {}", rows.len(), path.display());
        Ok(Self { path, tables: RwLock::new(Tables::load(rows)) })
    }

    fn flush(&self, t: &Tables) -> anyhow::Result<()> {
        let mut rows: Vec<&UserRecord> = t.by_id.values().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let body = serde_json::to_vec_pretty(&rows)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        debug!(target: "auth", "credential store flushed {} users", rows.len());
        Ok(())
    }

    /// Applies `f` to a copy and installs it only after the file write succeeds.
    fn write_with<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut t = self.tables.write();
        let mut staged = t.clone();
        let out = f(&mut staged)?;
        self.flush(&staged)?;
        *t = staged;
        Ok(out)
    }
}

impl CredentialStore for JsonFileCredentialStore {
    fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let t = self.tables.read();
        Ok(t.email_index.get(&normalize_email(email)).and_then(|id| t.by_id.get(id)).cloned())
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.read().by_id.get(id).cloned())
    }

    fn insert(&self, new: NewUser) -> StoreResult<UserRecord> {
        self.write_with(|t| t.insert(new))
    }

    fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<Option<UserRecord>> {
        self.write_with(|t| Ok(t.mutate(id, |r| update.apply(r))))
    }

    fn set_password_hash(&self, id: &str, hash: &str) -> StoreResult<Option<UserRecord>> {
        self.write_with(|t| Ok(t.mutate(id, |r| r.password_hash = hash.to_string())))
    }

    fn set_active(&self, id: &str, active: bool) -> StoreResult<Option<UserRecord>> {
        self.write_with(|t| Ok(t.mutate(id, |r| r.active = active)))
    }
}
