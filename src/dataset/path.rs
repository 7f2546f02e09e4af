//! Dataset file locations
//!
//! Each provider owns one directory under the data root:
//!
//! - `data/utilities/hsv_current.json` plus `hsv_data_<YYYYmmdd_HHMMSS>.json` backups
//! - `data/ecobee/ecobee_current.json` plus `ecobee_data_<YYYYmmdd_HHMMSS>.json` backups

use crate::Provider;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Backup file timestamp format
pub const BACKUP_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Current and backup locations of one provider's dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    dir: PathBuf,
    prefix: String,
}

impl DatasetPaths {
    /// Locations for `provider` under `data_dir`
    pub fn for_provider(data_dir: impl AsRef<Path>, provider: Provider) -> Self {
        let subdir = match provider {
            Provider::Hsv => "utilities",
            Provider::Ecobee => "ecobee",
        };
        Self {
            dir: data_dir.as_ref().join(subdir),
            prefix: provider.as_str().to_string(),
        }
    }

    /// Directory holding current and backup files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical current file
    pub fn current(&self) -> PathBuf {
        self.dir.join(format!("{}_current.json", self.prefix))
    }

    /// Backup file for a generation time
    ///
    /// `attempt` 0 gives the plain name; later attempts append `_<n>` so two
    /// writes within the same second never overwrite each other.
    pub fn backup(&self, generated_at: DateTime<Utc>, attempt: u32) -> PathBuf {
        let stamp = generated_at.format(BACKUP_TIME_FORMAT);
        let name = if attempt == 0 {
            format!("{}_data_{stamp}.json", self.prefix)
        } else {
            format!("{}_data_{stamp}_{attempt}.json", self.prefix)
        };
        self.dir.join(name)
    }

    /// Whether `path` is a backup file of this dataset
    pub fn is_backup(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{}_data_", self.prefix)) && n.ends_with(".json"))
    }
}
