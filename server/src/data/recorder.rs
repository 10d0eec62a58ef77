//! Persistent topic recorder
//!
//! A thin wrapper over an embedded ordered byte-key/byte-value store. The
//! only thing the broker ever persists is topic identity: one record per
//! persisted topic, key = big-endian 8-byte topic id, value = topic token
//! bytes. Message bodies are never written.

use std::path::Path;

use thiserror::Error;

use crate::core::config::KvConfig;

/// Error type for recorder operations
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("persistent recorder is not enabled")]
    NotEnabled,

    #[error("key not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}

/// Embedded key/value store holding `{topic id -> topic token}` records
pub struct Recorder {
    db: sled::Db,
}

impl Recorder {
    /// Open the store at the configured path.
    ///
    /// Fails with [`RecorderError::NotEnabled`] when persistence is switched
    /// off; callers hold an `Option<Recorder>` and treat persistence as a
    /// no-op in that case.
    pub fn open(config: &KvConfig) -> Result<Self, RecorderError> {
        if !config.enabled {
            return Err(RecorderError::NotEnabled);
        }
        let db = sled::open(Path::new(&config.dsn))?;
        tracing::debug!(dsn = %config.dsn, records = db.len(), "Recorder opened");
        Ok(Self { db })
    }

    /// All keys currently in the store, in key order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>, RecorderError> {
        let mut keys = Vec::new();
        for entry in self.db.iter() {
            let (key, _) = entry?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Read a value; absent keys are [`RecorderError::NotFound`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, RecorderError> {
        match self.db.get(key)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(RecorderError::NotFound),
        }
    }

    /// Write a record, replacing any previous value under the key.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), RecorderError> {
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Delete a record; deleting an absent key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<(), RecorderError> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    /// Flush outstanding writes to disk.
    pub fn close(&self) -> Result<(), RecorderError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Persistent key for a topic id
pub fn topic_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decode a persistent key back to a topic id
pub fn topic_id_from_key(key: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}
