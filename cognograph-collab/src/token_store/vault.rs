//! Storage backends for sealed token records.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use super::TokenStoreError;

const RECORD_EXT: &str = "token";

/// Keyed storage of opaque sealed records, one per workspace id.
pub trait TokenVault: Send + Sync {
    fn read(&self, workspace_id: &str) -> Result<Option<Vec<u8>>, TokenStoreError>;
    /// Replaces any existing record for the workspace.
    fn write(&self, workspace_id: &str, record: &[u8]) -> Result<(), TokenStoreError>;
    /// Returns whether a record existed.
    fn delete(&self, workspace_id: &str) -> Result<bool, TokenStoreError>;
    fn list(&self) -> Result<Vec<String>, TokenStoreError>;
}

/// Process-lifetime vault. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenVault for MemoryVault {
    fn read(&self, workspace_id: &str) -> Result<Option<Vec<u8>>, TokenStoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(workspace_id).cloned())
    }

    fn write(&self, workspace_id: &str, record: &[u8]) -> Result<(), TokenStoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(workspace_id.to_string(), record.to_vec());
        Ok(())
    }

    fn delete(&self, workspace_id: &str) -> Result<bool, TokenStoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(workspace_id).is_some())
    }

    fn list(&self) -> Result<Vec<String>, TokenStoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().cloned().collect())
    }
}

/// One file per workspace under a directory.
///
/// File names are the hex of the workspace id, so arbitrary ids never escape
/// the directory. Writes go to a temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileVault {
    dir: PathBuf,
}

impl FileVault {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TokenStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the record for `workspace_id`.
    pub fn path_for(&self, workspace_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXT}", hex::encode(workspace_id.as_bytes())))
    }
}

impl TokenVault for FileVault {
    fn read(&self, workspace_id: &str) -> Result<Option<Vec<u8>>, TokenStoreError> {
        match fs::read(self.path_for(workspace_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, workspace_id: &str, record: &[u8]) -> Result<(), TokenStoreError> {
        let path = self.path_for(workspace_id);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(record)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, workspace_id: &str) -> Result<bool, TokenStoreError> {
        match fs::remove_file(self.path_for(workspace_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, TokenStoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let decoded = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| hex::decode(stem).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            if let Some(id) = decoded {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
