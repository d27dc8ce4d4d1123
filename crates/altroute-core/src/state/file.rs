// # File Registry Store
//
// File-based implementation of RegistryStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: keeps `.backup` of the last known good file
// - Recovery: falls back to the backup if the main file does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "sessions": {
//     "default": {
//       "proxies": [
//         {
//           "baseUrl": "https://proxy.example.net/",
//           "lastTrialTimestamp": 1736424000000,
//           "lastSuccessTimestamp": 1736424000123,
//           "failed": false
//         }
//       ],
//       "lastWorkingDomain": "https://proxy.example.net/"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::health::ProxyRegistry;
use crate::traits::RegistryStore;

/// Registry file format version
const REGISTRY_FILE_VERSION: &str = "1.0";

/// File-based registry store with crash recovery
///
/// Every `save` is written through immediately.
#[derive(Debug)]
pub struct FileRegistryStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    sessions: HashMap<String, ProxyRegistry>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RegistryFileFormat {
    version: String,
    sessions: HashMap<String, ProxyRegistry>,
}

impl FileRegistryStore {
    /// Create or load a file registry store
    ///
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it does not parse, load the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let sessions = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                sessions,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, ProxyRegistry>, Error> {
        match Self::load_file(path).await {
            Ok(sessions) => {
                tracing::debug!("Loaded registry file: {} session(s)", sessions.len());
                Ok(sessions)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Registry file {} is corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty registry.");
                    return Ok(HashMap::new());
                }

                match Self::load_file(&backup_path).await {
                    Ok(sessions) => {
                        tracing::info!("Recovered registry from backup: {} session(s)", sessions.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore registry file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(sessions)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty registry.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load_file(path: &Path) -> Result<HashMap<String, ProxyRegistry>, Error> {
        if !path.exists() {
            tracing::debug!("Registry file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read registry file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: RegistryFileFormat = serde_json::from_str(&content)?;

        if file.version != REGISTRY_FILE_VERSION {
            tracing::warn!(
                "Registry file version mismatch: expected {}, got {}. Attempting to load anyway.",
                REGISTRY_FILE_VERSION,
                file.version
            );
        }

        Ok(file.sessions)
    }

    async fn write_file(&self) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;

        let file = RegistryFileFormat {
            version: REGISTRY_FILE_VERSION.to_string(),
            sessions: state_guard.sessions.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state_guard.dirty = false;
        tracing::trace!("Registry written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load(&self, session_id: &str) -> Result<Option<ProxyRegistry>, Error> {
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, registry: &ProxyRegistry) -> Result<(), Error> {
        {
            let mut state_guard = self.state.write().await;
            state_guard
                .sessions
                .insert(session_id.to_string(), registry.clone());
            state_guard.dirty = true;
        }
        self.write_file().await
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write_file().await } else { Ok(()) }
    }
}
