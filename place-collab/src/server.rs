//! WebSocket server for the shared canvas.
//!
//! Architecture:
//! ```text
//! Client A ──┐  upgrade (identity headers, 512 B frame limit)
//!            ├──► handle_connection ──► run_session ──┐
//! Client B ──┘                                        │
//!                                                     ▼
//!                                   HubHandle ──► Hub task ──► Board
//!                                       ▲                 ├── RateGovernor
//!                  Api (programmatic) ──┘                 └── RocksStore / MemoryStore
//! ```
//!
//! The board is loaded from storage before the listener opens; a store that
//! cannot be opened or read is fatal at startup, and so are hub or session
//! limits that cannot work.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use place_core::Identity;

use crate::api::Api;
use crate::hub::{Hub, HubConfig, HubHandle};
use crate::session::{run_session, SessionConfig, SessionError};
use crate::storage::{MemoryStore, RocksStore, StoreConfig, StoreError};

/// Request header carrying the numeric user id.
pub const USER_ID_HEADER: &str = "x-place-user-id";
/// Request header carrying the user handle.
pub const USER_HANDLE_HEADER: &str = "x-place-user-handle";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Key of the board snapshot in the store
    pub board_key: String,
    /// Rate limit, command queue and tile metadata settings
    pub hub: HubConfig,
    /// Per-connection limits
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            board_key: "board".to_string(),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Resolves the acting user from the upgrade request.
pub trait IdentityResolver: Send + Sync + 'static {
    /// `None` refuses the upgrade with 401.
    fn resolve(&self, request: &Request) -> Option<Identity>;
}

/// Reads the identity from trusted headers set by an upstream auth layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIdentity;

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, request: &Request) -> Option<Identity> {
        let headers = request.headers();
        let id = headers
            .get(USER_ID_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;
        let handle = headers.get(USER_HANDLE_HEADER)?.to_str().ok()?.trim();
        if handle.is_empty() {
            return None;
        }
        Some(Identity::new(id, handle))
    }
}

/// Startup failures.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Store(StoreError),
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Invalid configuration: {e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Store(e)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// The canvas server.
pub struct PlaceServer {
    config: ServerConfig,
    hub: HubHandle,
    resolver: Arc<dyn IdentityResolver>,
}

impl PlaceServer {
    /// Open storage, load the board and start the hub.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.hub.validate().map_err(ServerError::Config)?;
        config.session.validate().map_err(ServerError::Config)?;

        let hub = match &config.storage_path {
            Some(path) => {
                let store = Arc::new(RocksStore::open(StoreConfig {
                    path: path.clone(),
                    board_key: config.board_key.clone(),
                    ..StoreConfig::default()
                })?);
                Hub::load(store.clone(), config.hub.clone())?.with_audit(store)
            }
            None => {
                log::warn!("No storage path configured, board will not survive restarts");
                let store = Arc::new(MemoryStore::new());
                Hub::load(store.clone(), config.hub.clone())?.with_audit(store)
            }
        };

        Ok(Self {
            hub: hub.spawn(),
            resolver: Arc::new(HeaderIdentity),
            config,
        })
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Result<Self, ServerError> {
        Self::new(ServerConfig::default())
    }

    /// Replace the header-based identity resolver.
    pub fn with_resolver(mut self, resolver: impl IdentityResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Programmatic endpoints backed by the same hub.
    pub fn api(&self) -> Api {
        Api::new(self.hub.clone())
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Place server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let resolver = self.resolver.clone();
            let session = self.config.session.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, resolver, session).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Upgrade one TCP connection and run its session.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    resolver: Arc<dyn IdentityResolver>,
    config: SessionConfig,
) -> Result<(), SessionError> {
    let mut identity = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match resolver.resolve(request) {
            Some(resolved) => {
                identity = Some(resolved);
                Ok(response)
            }
            None => {
                let mut refusal = ErrorResponse::new(Some("missing or invalid identity".to_string()));
                *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                Err(refusal)
            }
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(config.websocket_config()),
    )
    .await?;

    let Some(identity) = identity else {
        return Ok(());
    };
    log::debug!("WebSocket connection established from {addr} as {identity}");
    run_session(ws, identity, hub, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("ws://localhost/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_header_identity() {
        let req = request(&[(USER_ID_HEADER, "42"), (USER_HANDLE_HEADER, "grace")]);
        assert_eq!(HeaderIdentity.resolve(&req), Some(Identity::new(42, "grace")));
    }

    #[test]
    fn test_header_identity_rejects_missing_or_invalid() {
        assert_eq!(HeaderIdentity.resolve(&request(&[])), None);
        assert_eq!(
            HeaderIdentity.resolve(&request(&[(USER_ID_HEADER, "42")])),
            None
        );
        assert_eq!(
            HeaderIdentity.resolve(&request(&[(USER_ID_HEADER, "abc"), (USER_HANDLE_HEADER, "x")])),
            None
        );
        assert_eq!(
            HeaderIdentity.resolve(&request(&[(USER_ID_HEADER, "1"), (USER_HANDLE_HEADER, " ")])),
            None
        );
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.storage_path.is_none());
        assert_eq!(config.board_key, "board");
        assert_eq!(config.hub.min_interval, std::time::Duration::from_secs(1));
        assert_eq!(config.session.max_frame_size, 512);
    }

    #[tokio::test]
    async fn test_server_in_memory_starts() {
        let server = PlaceServer::with_defaults().unwrap();
        let stats = server.hub().stats().await.unwrap();
        assert_eq!(stats.sessions, 0);
        assert!(server.api().tile(0, 0).await.is_success());
    }

    #[tokio::test]
    async fn test_invalid_limits_refused_at_startup() {
        let config = ServerConfig {
            session: SessionConfig {
                ping_interval: std::time::Duration::ZERO,
                ..SessionConfig::default()
            },
            ..ServerConfig::default()
        };
        assert!(matches!(PlaceServer::new(config), Err(ServerError::Config(_))));

        let config = ServerConfig {
            hub: HubConfig {
                prune_interval: std::time::Duration::ZERO,
                ..HubConfig::default()
            },
            ..ServerConfig::default()
        };
        assert!(matches!(PlaceServer::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        // Holding the database open keeps its lock
        let _held = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();

        let config = ServerConfig {
            storage_path: Some(path),
            ..ServerConfig::default()
        };
        assert!(matches!(
            PlaceServer::new(config),
            Err(ServerError::Store(StoreError::Unavailable(_)))
        ));
    }
}
