use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use steamshelf_core::Watermark;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("reading watermark {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watermark {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing watermark {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding watermark: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed store for the singleton [`Watermark`].
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted watermark; `Ok(None)` when nothing has been saved yet.
    pub async fn load_checked(&self) -> Result<Option<Watermark>, WatermarkError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(WatermarkError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| WatermarkError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Reads the persisted watermark, falling back to the empty one.
    ///
    /// An unreadable or corrupt file is reported at WARN: it triggers a full
    /// re-sync of both feeds.
    pub async fn load(&self) -> Watermark {
        match self.load_checked().await {
            Ok(Some(watermark)) => watermark,
            Ok(None) => {
                debug!(path = %self.path.display(), "no watermark yet; starting from empty state");
                Watermark::default()
            }
            Err(err) => {
                warn!(error = %err, "discarding unusable watermark; next pass runs a full sync");
                Watermark::default()
            }
        }
    }

    /// Persists `watermark` with a temp-file write and atomic rename.
    pub async fn save(&self, watermark: &Watermark) -> Result<(), WatermarkError> {
        let bytes = serde_json::to_vec_pretty(watermark)?;
        let result = self.write_atomically(&bytes).await;
        if let Err(err) = &result {
            warn!(error = %err, "failed to persist watermark");
        }
        result
    }

    /// Deletes the persisted watermark. Returns whether a file was removed.
    pub async fn reset(&self) -> Result<bool, WatermarkError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(WatermarkError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_atomically(&self, bytes: &[u8]) -> Result<(), WatermarkError> {
        let write_err = |source| WatermarkError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await.map_err(write_err)?;

        let temp_path = parent.join(format!(".watermark.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(write_err)?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(source));
        }

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(source));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_empty_watermark() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path().join("state").join("watermark.json"));

        assert!(store.load_checked().await.expect("load").is_none());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_survives_a_new_store_instance() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("watermark.json");
        let watermark = Watermark {
            taxonomy_hash: Some(77),
            catalog_cursor: Some(1000),
        };

        WatermarkStore::new(&path).save(&watermark).await.expect("save");
        let reloaded = WatermarkStore::new(&path).load().await;
        assert_eq!(reloaded, watermark);

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_but_load_falls_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("watermark.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = WatermarkStore::new(&path);

        assert!(matches!(
            store.load_checked().await,
            Err(WatermarkError::Corrupt { .. })
        ));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn save_into_unwritable_location_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let store = WatermarkStore::new(blocker.join("watermark.json"));

        let err = store.save(&Watermark::default()).await.unwrap_err();
        assert!(matches!(err, WatermarkError::Write { .. }));
    }

    #[tokio::test]
    async fn reset_removes_state_and_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path().join("watermark.json"));
        store
            .save(&Watermark::default().with_taxonomy_hash(5))
            .await
            .expect("save");

        assert!(store.reset().await.expect("reset"));
        assert!(!store.reset().await.expect("second reset"));
        assert!(store.load().await.is_empty());
    }
}
