//! RocksDB-backed board store.
//!
//! Column families:
//! - `board`: the packed snapshot under a configurable key (5000 bytes)
//! - `tiles`: audit records keyed by `<x:2 BE><y:2 BE>` (bincode)
//!
//! Every write goes through a single hub task, so the read-modify-write in
//! [`BoardStore::write_cell`] needs no merge operator.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteOptions,
};
use std::path::{Path, PathBuf};

use place_core::{board::set_packed_cell, Board, Color, Coordinate, DEFAULT_COLOR, PACKED_LEN};

use super::{AuditLog, BoardStore, StoreError, TileRecord};

const CF_BOARD: &str = "board";
const CF_TILES: &str = "tiles";

const COLUMN_FAMILIES: &[&str] = &[CF_BOARD, CF_TILES];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Key of the packed board inside the `board` column family
    pub board_key: String,
    /// Block cache size in bytes (default: 8MB; the whole dataset is tiny)
    pub block_cache_size: usize,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 64)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("place_data"),
            board_key: "board".to_string(),
            block_cache_size: 8 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small cache, given directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 1024 * 1024,
            max_open_files: 16,
            ..Self::default()
        }
    }
}

/// RocksDB-backed board and audit store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    ///
    /// Fails with [`StoreError::Unavailable`] if the database cannot be
    /// opened (fatal at startup).
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened board store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_BOARD => {
                // One hot value, rewritten constantly
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup((config.block_cache_size >> 20).max(1) as u64);
            }
            CF_TILES => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            _ => {}
        }

        opts
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn board_key(&self) -> &[u8] {
        self.config.board_key.as_bytes()
    }

    fn read_packed(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_BOARD)?;
        match self.db.get_cf(cf, self.board_key())? {
            Some(bytes) if bytes.len() != PACKED_LEN => Err(StoreError::Corrupt {
                expected: PACKED_LEN,
                actual: bytes.len(),
            }),
            other => Ok(other),
        }
    }

    fn write_packed(&self, packed: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_BOARD)?;
        self.db.put_cf_opt(cf, self.board_key(), packed, &self.write_opts())?;
        Ok(())
    }
}

impl BoardStore for RocksStore {
    fn load_snapshot(&self) -> Result<Vec<u8>, StoreError> {
        if let Some(packed) = self.read_packed()? {
            return Ok(packed);
        }
        let fresh = Board::filled(DEFAULT_COLOR).to_packed();
        self.write_packed(&fresh)?;
        log::info!(
            "Initialized board '{}' to {DEFAULT_COLOR}",
            self.config.board_key
        );
        Ok(fresh)
    }

    fn write_cell(&self, coord: Coordinate, color: Color) -> Result<(), StoreError> {
        let mut packed = match self.read_packed()? {
            Some(packed) => packed,
            None => Board::filled(DEFAULT_COLOR).to_packed(),
        };
        set_packed_cell(&mut packed, coord, color)?;
        self.write_packed(&packed)
    }
}

impl AuditLog for RocksStore {
    fn record(&self, record: &TileRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_TILES)?;
        let coord = Coordinate::new(record.x.into(), record.y.into())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.db
            .put_cf_opt(cf, TileRecord::key(coord), record.encode()?, &self.write_opts())?;
        Ok(())
    }

    fn lookup(&self, coord: Coordinate) -> Result<Option<TileRecord>, StoreError> {
        let cf = self.cf(CF_TILES)?;
        match self.db.get_cf(cf, TileRecord::key(coord))? {
            Some(bytes) => TileRecord::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}
