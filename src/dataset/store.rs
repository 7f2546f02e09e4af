//! Atomic dataset persistence
//!
//! Writes happen in two steps. [`DatasetStore::stage`] serializes the dataset
//! into a synced temp file next to the current file; [`StagedWrite::commit`]
//! renames it over the current file and then writes a timestamped backup.
//! Dropping a [`StagedWrite`] discards the temp file and leaves the previous
//! current file untouched.

use super::{Dataset, DatasetError, DatasetPaths, DatasetResult};
use crate::Provider;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Backup name attempts before giving up on a free name
const MAX_BACKUP_ATTEMPTS: u32 = 100;

/// Files produced by a committed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Replaced current file
    pub current: PathBuf,
    /// Newly created backup
    pub backup: PathBuf,
    /// Serialized size in bytes
    pub bytes: usize,
}

/// Reads and writes one provider's dataset
#[derive(Debug, Clone)]
pub struct DatasetStore {
    provider: Provider,
    paths: DatasetPaths,
}

impl DatasetStore {
    /// Store for `provider` under `data_dir`
    pub fn new(data_dir: impl AsRef<Path>, provider: Provider) -> Self {
        Self {
            provider,
            paths: DatasetPaths::for_provider(data_dir, provider),
        }
    }

    /// Provider whose dataset this store holds
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// File locations
    pub fn paths(&self) -> &DatasetPaths {
        &self.paths
    }

    /// Load the current dataset
    ///
    /// # Returns
    /// `None` when no current file exists yet
    ///
    /// # Errors
    /// [`DatasetError::Corrupt`] when the file exists but cannot be parsed,
    /// fails validation, or holds channels of another provider
    pub fn read(&self) -> DatasetResult<Option<Dataset>> {
        let path = self.paths.current();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(provider = %self.provider, path = %path.display(), "No current dataset");
                return Ok(None);
            }
            Err(e) => return Err(DatasetError::Io(e)),
        };

        let dataset: Dataset = serde_json::from_str(&contents).map_err(|e| DatasetError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(channel) = dataset.channels().find(|c| c.provider() != self.provider) {
            return Err(DatasetError::Corrupt {
                path,
                reason: format!("channel {channel} does not belong to {}", self.provider),
            });
        }

        dataset
            .validate()
            .map_err(|reason| DatasetError::Corrupt {
                path: path.clone(),
                reason,
            })?;

        debug!(
            provider = %self.provider,
            readings = dataset.total_readings(),
            "Loaded current dataset"
        );
        Ok(Some(dataset))
    }

    /// Serialize `dataset` into a synced temp file beside the current file
    ///
    /// # Errors
    /// [`DatasetError::PartialWrite`] if the dataset is invalid or the temp
    /// file cannot be written; nothing on disk changes in that case
    pub fn stage(&self, dataset: &Dataset) -> DatasetResult<StagedWrite> {
        let current = self.paths.current();
        let partial = |reason: String| DatasetError::PartialWrite {
            path: current.clone(),
            reason,
        };

        dataset
            .validate()
            .map_err(|e| partial(format!("refusing to write invalid dataset: {e}")))?;

        std::fs::create_dir_all(self.paths.dir())
            .map_err(|e| partial(format!("failed to create {}: {e}", self.paths.dir().display())))?;

        let json = serde_json::to_vec_pretty(dataset)
            .map_err(|e| partial(format!("failed to serialize dataset: {e}")))?;

        let temp = write_synced_temp(self.paths.dir(), &json).map_err(partial)?;

        debug!(provider = %self.provider, bytes = json.len(), "Dataset staged");
        Ok(StagedWrite {
            temp,
            contents: json,
            paths: self.paths.clone(),
            provider: self.provider,
        })
    }

    /// Stage and commit in one step
    pub fn write(&self, dataset: &Dataset, generated_at: DateTime<Utc>) -> DatasetResult<WriteReceipt> {
        self.stage(dataset)?.commit(generated_at)
    }
}

/// A fully written temp file waiting to replace the current dataset
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    contents: Vec<u8>,
    paths: DatasetPaths,
    provider: Provider,
}

impl StagedWrite {
    /// Temp file path (exists until commit or drop)
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Replace the current file, then write the backup
    ///
    /// # Errors
    /// - [`DatasetError::PartialWrite`] if the rename fails (current untouched)
    /// - [`DatasetError::Backup`] if the backup fails after the current file
    ///   was replaced
    pub fn commit(self, generated_at: DateTime<Utc>) -> DatasetResult<WriteReceipt> {
        let current = self.paths.current();
        self.temp
            .persist(&current)
            .map_err(|e| DatasetError::PartialWrite {
                path: current.clone(),
                reason: format!("rename failed: {}", e.error),
            })?;
        sync_dir(self.paths.dir());

        let backup = write_backup(&self.paths, &self.contents, generated_at)?;

        info!(
            provider = %self.provider,
            current = %current.display(),
            backup = %backup.display(),
            bytes = self.contents.len(),
            "Dataset committed"
        );
        Ok(WriteReceipt {
            current,
            backup,
            bytes: self.contents.len(),
        })
    }
}

fn write_synced_temp(dir: &Path, contents: &[u8]) -> Result<NamedTempFile, String> {
    let mut temp =
        NamedTempFile::new_in(dir).map_err(|e| format!("failed to create temp file: {e}"))?;
    temp.write_all(contents)
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    temp.flush()
        .map_err(|e| format!("failed to flush temp file: {e}"))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| format!("failed to sync temp file: {e}"))?;
    Ok(temp)
}

fn write_backup(
    paths: &DatasetPaths,
    contents: &[u8],
    generated_at: DateTime<Utc>,
) -> DatasetResult<PathBuf> {
    let first = paths.backup(generated_at, 0);
    let mut temp = write_synced_temp(paths.dir(), contents).map_err(|reason| DatasetError::Backup {
        path: first.clone(),
        reason,
    })?;

    for attempt in 0..MAX_BACKUP_ATTEMPTS {
        let path = paths.backup(generated_at, attempt);
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                sync_dir(paths.dir());
                return Ok(path);
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Backup name taken, trying next");
                temp = e.file;
            }
            Err(e) => {
                return Err(DatasetError::Backup {
                    path,
                    reason: e.error.to_string(),
                })
            }
        }
    }

    warn!(path = %first.display(), "No free backup name");
    Err(DatasetError::Backup {
        path: first,
        reason: format!("{MAX_BACKUP_ATTEMPTS} backup names already taken"),
    })
}

/// Flush a directory entry after a rename; a failure is logged, not returned
pub(crate) fn sync_dir(dir: &Path) {
    if let Err(e) = std::fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync directory after rename");
    }
}
