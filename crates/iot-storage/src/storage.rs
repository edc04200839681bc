//! Versioned JSON files in a storage directory

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::{StoreError, StoreResult};

/// Storage file wrapper with version tracking
///
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "iot.flows",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version, bumped on breaking changes
    pub version: u32,
    pub minor_version: u32,
    /// File name within the storage directory
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// A directory of versioned JSON files
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Load the data stored under `key`, checking its major version
    ///
    /// Returns `None` if the file does not exist.
    pub async fn load<T>(&self, key: &str, version: u32, minor_version: u32) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        if !fs::try_exists(&path).await? {
            debug!(key, "Storage file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;

        #[derive(Deserialize)]
        struct VersionInfo {
            version: u32,
            minor_version: u32,
        }

        let info: VersionInfo = serde_json::from_str(&content)?;
        if info.version != version {
            return Err(StoreError::MigrationRequired {
                key: key.to_string(),
                from: info.version,
                to: version,
            });
        }
        if info.minor_version < minor_version {
            warn!(
                key,
                found = info.minor_version,
                expected = minor_version,
                "Storage file has an older minor version"
            );
        }

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!(key, version = file.version, minor_version = file.minor_version, "Loaded storage file");
        Ok(Some(file.data))
    }

    /// Save a file, writing to a temp file first and renaming it into place
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StoreResult<()>
    where
        T: Serialize,
    {
        fs::create_dir_all(&self.dir).await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));

        let content = serde_json::to_string_pretty(file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %file.key, bytes = content.len(), "Saved storage file");
        Ok(())
    }
}
