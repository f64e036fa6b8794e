//! # place-collab: live coordination for the shared pixel canvas
//!
//! One authoritative board, many connected viewers, every accepted update
//! broadcast to all of them and written through to durable storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   text frames    ┌──────────────┐
//! │ CanvasClient │ ◄──────────────► │ PlaceServer  │
//! │ (replica)    │  "x y code"      │ (upgrade)    │
//! └──────────────┘                  └──────┬───────┘
//!                                          │ one session per connection
//!                                          ▼
//!                                   ┌──────────────┐      ┌──────────────┐
//!                                   │ Hub task     │ ───► │ BoardStore   │
//!                                   │ (authority)  │      │ (RocksDB)    │
//!                                   └──────┬───────┘      └──────────────┘
//!                                          │ try_send, bounded queues
//!                                          ▼
//!                                   outbound pumps (fan-out)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: text wire format for notifications and requests
//! - [`governor`]: per-identity minimum update interval
//! - [`hub`]: command-queue actor owning board, governor and sessions
//! - [`session`]: inbound/outbound pumps of one connection
//! - [`storage`]: packed board snapshot and tile audit log
//! - [`api`]: programmatic set/get endpoints with status codes
//! - [`server`]: WebSocket listener and identity resolution
//! - [`client`]: connecting client keeping a local board replica

pub mod api;
pub mod client;
pub mod governor;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use api::{Api, ApiResponse, SetTileRequest, TileFormat};
pub use client::{CanvasClient, ClientError};
pub use governor::RateGovernor;
pub use hub::{
    ColorRef, Hub, HubConfig, HubError, HubHandle, HubStats, Outbound, SessionHandle, TileInfo,
    UpdateError, UpdateEvent,
};
pub use protocol::{ClientMessage, Notification, ProtocolError};
pub use server::{HeaderIdentity, IdentityResolver, PlaceServer, ServerConfig, ServerError};
pub use session::{SessionConfig, SessionError};
pub use storage::{AuditLog, BoardStore, MemoryStore, RocksStore, StoreConfig, StoreError, TileRecord};
