//! In-memory store, used when no storage path is configured and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use place_core::{board::set_packed_cell, Board, Color, Coordinate, DEFAULT_COLOR};

use super::{AuditLog, BoardStore, StoreError, TileRecord};

/// Volatile board + audit store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    board: Mutex<Option<Vec<u8>>>,
    tiles: Mutex<HashMap<[u8; 4], TileRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing packed snapshot.
    pub fn with_snapshot(packed: Vec<u8>) -> Self {
        Self {
            board: Mutex::new(Some(packed)),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current packed snapshot, if initialized.
    pub fn packed(&self) -> Option<Vec<u8>> {
        lock(&self.board).clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl BoardStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Vec<u8>, StoreError> {
        let mut board = lock(&self.board);
        let packed = board.get_or_insert_with(|| Board::filled(DEFAULT_COLOR).to_packed());
        Ok(packed.clone())
    }

    fn write_cell(&self, coord: Coordinate, color: Color) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut board = lock(&self.board);
        let packed = board.get_or_insert_with(|| Board::filled(DEFAULT_COLOR).to_packed());
        set_packed_cell(packed, coord, color)?;
        Ok(())
    }
}

impl AuditLog for MemoryStore {
    fn record(&self, record: &TileRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let coord = Coordinate::new(record.x.into(), record.y.into())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        lock(&self.tiles).insert(TileRecord::key(coord), record.clone());
        Ok(())
    }

    fn lookup(&self, coord: Coordinate) -> Result<Option<TileRecord>, StoreError> {
        Ok(lock(&self.tiles).get(&TileRecord::key(coord)).cloned())
    }
}

/// Lock, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
