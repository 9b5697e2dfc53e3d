//! Client session layer: shared session context, persistence, the refreshing
//! request pipeline and the session manager built on it.

mod context;
mod storage;
mod transport;
mod interceptor;
mod session;

pub use context::{SessionContext, SessionData, SessionEvent, SessionPhase};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError, REQUEST_ID_HEADER};
pub use interceptor::{ApiClient, ApiError, Auth, BatchRequest, REFRESH_PATH};
pub use session::{Availability, ClientSessionManager, SessionSnapshot};

use std::sync::Arc;

use tracing::info;

use crate::config::ClientConfig;

/// Assemble the client stack over HTTP with file-backed persistence.
pub fn connect(config: &ClientConfig) -> anyhow::Result<ClientSessionManager> {
    let transport = Arc::new(HttpTransport::new(&config.base_url, config.timeout)?);
    let storage = Arc::new(FileStorage::new(&config.session_file));
    info!(target: "client", "api={} session_file={}", transport.base_url(), storage.path().display());
    let session = SessionContext::new(storage);
    Ok(ClientSessionManager::new(Arc::new(ApiClient::new(transport, session))))
}
