use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use contracts::{BatchKey, BatchState, ContractError, KeyStateStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const STATE_EXTENSION: &str = "json";

/// Key state kept as one JSON file per key, surviving restarts.
///
/// A file is named by the SHA-256 of its key, so names have a fixed length
/// whatever the key. The key itself is written inside the file for `keys()`.
/// A save writes a sibling temp file and renames it over the old one, which
/// makes every save all-or-nothing on the same filesystem.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

#[derive(Serialize)]
struct StateFile<'a> {
    key: &'a str,
    #[serde(flatten)]
    state: &'a BatchState,
}

#[derive(Deserialize)]
struct KeyOnly {
    key: String,
}

#[derive(Deserialize)]
struct GenerationOnly {
    generation: u64,
}

impl FileStateStore {
    /// Open (creating if needed) a state directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ContractError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "File state store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &BatchKey) -> PathBuf {
        self.dir
            .join(format!("{}.{STATE_EXTENSION}", file_stem(key.as_str())))
    }

    async fn read(&self, key: &BatchKey) -> Result<Option<Vec<u8>>, ContractError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ContractError::store_read(key.as_str(), e)),
        }
    }
}

impl KeyStateStore for FileStateStore {
    async fn load(&self, key: &BatchKey) -> Result<Option<BatchState>, ContractError> {
        let Some(bytes) = self.read(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ContractError::store_read(key.as_str(), e))
    }

    async fn generation(&self, key: &BatchKey) -> Result<u64, ContractError> {
        let Some(bytes) = self.read(key).await? else {
            return Ok(0);
        };
        serde_json::from_slice::<GenerationOnly>(&bytes)
            .map(|g| g.generation)
            .map_err(|e| ContractError::store_read(key.as_str(), e))
    }

    async fn save(&self, key: &BatchKey, state: &BatchState) -> Result<(), ContractError> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{STATE_EXTENSION}.tmp"));
        let file = StateFile {
            key: key.as_str(),
            state,
        };
        let bytes =
            serde_json::to_vec(&file).map_err(|e| ContractError::store_write(key.as_str(), e))?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| ContractError::store_write(key.as_str(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ContractError::store_write(key.as_str(), e))
    }

    async fn keys(&self) -> Result<Vec<BatchKey>, ContractError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXTENSION) {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<KeyOnly>(&bytes) {
                Ok(KeyOnly { key })
                    if path.file_stem().and_then(|s| s.to_str()) == Some(file_stem(&key).as_str()) =>
                {
                    keys.push(BatchKey::from(key))
                }
                _ => warn!(file = %path.display(), "Skipping unrecognized state file"),
            }
        }
        Ok(keys)
    }
}

fn file_stem(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
