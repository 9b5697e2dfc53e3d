//! Where a client session survives between runs.
//!
//! Only `isAuthenticated` is authoritative; the user and tokens are a cache that the
//! session manager re-fetches when missing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::context::SessionData;

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;
    fn save(&self, data: &SessionData) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Process-local storage; nothing outlives the process.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<SessionData>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn with(data: SessionData) -> Self {
        Self { slot: Mutex::new(Some(data)) }
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        *self.slot.lock() = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// JSON file storage used by the CLI.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).with_context(|| format!("reading {}", self.path.display()))?;
        match serde_json::from_str::<SessionData>(&raw) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                // a corrupt cache is treated as no session
                warn!(target: "client", "ignoring unreadable session file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        debug!(target: "client", "session saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
