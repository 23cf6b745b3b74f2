//! Durable checkpoint of the last fully processed Cosmos height
//!
//! A single rocksdb key holds the height as 8 big-endian bytes. The store
//! is owned by the listener; nothing else writes to it.

use rocksdb::{Options, WriteOptions, DB};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Fixed key of the checkpoint record
pub const LAST_PROCESSED_BLOCK_KEY: &[u8] = b"cosmosLastProcessedBlock";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("corrupt checkpoint record: expected 8 bytes, found {0}")]
    Corrupt(usize),

    #[error("checkpoint regression: stored {stored}, attempted {attempted}")]
    Regression { stored: u64, attempted: u64 },
}

pub struct CheckpointStore {
    db: DB,
    last: Option<u64>,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let mut options = Options::default();
        options.create_if_missing(true);

        let db = DB::open(&options, path.as_ref())?;
        let last = read_height(&db)?;

        debug!(
            path = %path.as_ref().display(),
            last_processed = ?last,
            "Opened checkpoint store"
        );

        Ok(Self { db, last })
    }

    /// Open an existing checkpoint database without taking its lock
    ///
    /// Works while a running listener owns the store. Every `save` fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db = DB::open_for_read_only(&Options::default(), path.as_ref(), false)?;
        let last = read_height(&db)?;
        Ok(Self { db, last })
    }

    /// Last persisted height, `None` when nothing was ever processed
    pub fn load(&self) -> Option<u64> {
        self.last
    }

    /// Persist `height` as the last processed block
    ///
    /// Writes are synced before returning. A height below the stored one is
    /// rejected; re-saving the same height is a no-op.
    pub fn save(&mut self, height: u64) -> Result<(), CheckpointError> {
        match self.last {
            Some(stored) if height < stored => {
                return Err(CheckpointError::Regression {
                    stored,
                    attempted: height,
                })
            }
            Some(stored) if height == stored => return Ok(()),
            _ => {}
        }

        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        self.db
            .put_opt(LAST_PROCESSED_BLOCK_KEY, height.to_be_bytes(), &write_options)?;

        self.last = Some(height);
        Ok(())
    }
}

fn read_height(db: &DB) -> Result<Option<u64>, CheckpointError> {
    match db.get(LAST_PROCESSED_BLOCK_KEY)? {
        None => Ok(None),
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CheckpointError::Corrupt(bytes.len()))?;
            Ok(Some(u64::from_be_bytes(raw)))
        }
    }
}
