use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use thiserror::Error;

/// Single-byte key/value persistence, the only storage the mesh core
/// needs: the node address and the learned gateway address.
///
/// Failures are never fatal; callers fall back to ephemeral regenerated
/// values and log a warning.
pub trait KeyValueStore {
    fn load_byte(&self, key: &str) -> Result<Option<u8>, StorageError>;
    fn save_byte(&mut self, key: &str, value: u8) -> Result<(), StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(&'static str),
    #[error("storage i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory store, the no-persistence build. Contents vanish on restart,
/// which the protocol tolerates: the node re-derives its address from the
/// MAC and re-learns the gateway from the next ANNOUNCE.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load_byte(&self, key: &str) -> Result<Option<u8>, StorageError> {
        Ok(self.values.get(key).copied())
    }

    fn save_byte(&mut self, key: &str, value: u8) -> Result<(), StorageError> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}

/// Durable store keeping one tiny file per key under a base directory,
/// the flash-filesystem build.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn load_byte(&self, key: &str) -> Result<Option<u8>, StorageError> {
        let path = self.path_for(key);
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut byte = [0u8; 1];
        match file.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            // An empty file means the value was never written.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_byte(&mut self, key: &str, value: u8) -> Result<(), StorageError> {
        let mut file = fs::File::create(self.path_for(key))?;
        file.write_all(&[value])?;
        Ok(())
    }
}
