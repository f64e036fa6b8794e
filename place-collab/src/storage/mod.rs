//! Durable storage for the board and its audit trail.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   write_cell    ┌──────────────────────────────────────┐
//! │ Hub task    │ ──────────────► │ BoardStore                           │
//! │ (in-memory  │   record        │   "board": packed snapshot, 5000 B   │
//! │  authority) │ ──────────────► │ AuditLog                             │
//! └──────┬──────┘                 │   "tiles": latest editor per cell    │
//!        │ on startup             └──────────────────────────────────────┘
//!        ▼
//!  load_snapshot → Board::from_packed
//! ```
//!
//! The hub is the only writer, so read-modify-write of a cell's nibble
//! never races.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use chrono::{DateTime, Utc};
use place_core::{Color, Coordinate, Identity, TileMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte-packed board persistence.
pub trait BoardStore: Send + Sync {
    /// Load the packed board, initializing every cell to the default color
    /// if no snapshot exists yet.
    fn load_snapshot(&self) -> Result<Vec<u8>, StoreError>;

    /// Set one cell's nibble. Idempotent.
    fn write_cell(&self, coord: Coordinate, color: Color) -> Result<(), StoreError>;
}

/// Per-cell record of the latest edit. Read-back enrichment only.
pub trait AuditLog: Send + Sync {
    /// Upsert the record for `record`'s cell.
    fn record(&self, record: &TileRecord) -> Result<(), StoreError>;

    /// Latest record for a cell, if any.
    fn lookup(&self, coord: Coordinate) -> Result<Option<TileRecord>, StoreError>;
}

/// Audit row: keyed by (x, y), upsert semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    pub x: u16,
    pub y: u16,
    pub editor_id: u64,
    pub editor_handle: String,
    pub color: u8,
    pub updated_at: DateTime<Utc>,
}

impl TileRecord {
    pub fn new(coord: Coordinate, color: Color, editor: &Identity, updated_at: DateTime<Utc>) -> Self {
        Self {
            x: coord.x() as u16,
            y: coord.y() as u16,
            editor_id: editor.id,
            editor_handle: editor.handle.clone(),
            color: color.code(),
            updated_at,
        }
    }

    pub fn meta(&self) -> TileMeta {
        TileMeta {
            editor: Identity::new(self.editor_id, self.editor_handle.clone()),
            updated_at: self.updated_at,
        }
    }

    /// Storage key: x then y, big-endian.
    pub(crate) fn key(coord: Coordinate) -> [u8; 4] {
        let x = (coord.x() as u16).to_be_bytes();
        let y = (coord.y() as u16).to_be_bytes();
        [x[0], x[1], y[0], y[1]]
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(record)
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or I/O failure
    Unavailable(String),
    /// Stored snapshot has the wrong size
    Corrupt { expected: usize, actual: usize },
    /// Record encoding/decoding failed
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {e}"),
            StoreError::Corrupt { expected, actual } => {
                write!(f, "Corrupt snapshot: {actual} bytes, expected {expected}")
            }
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<place_core::BoardError> for StoreError {
    fn from(e: place_core::BoardError) -> Self {
        match e {
            place_core::BoardError::SnapshotLength { expected, actual } => {
                StoreError::Corrupt { expected, actual }
            }
            other => StoreError::Serialization(other.to_string()),
        }
    }
}
