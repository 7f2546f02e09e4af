//! On-disk token cache
//!
//! One small JSON file per cache key (`<dir>/<key>.json`). Files are replaced
//! atomically; a file that cannot be parsed, or that belongs to another
//! provider, is treated as absent so a damaged cache only costs a fresh login.

use super::AuthError;
use crate::dataset::store::sync_dir;
use crate::Provider;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bearer token issued by the utility provider
pub const HSV_TOKEN_KEY: &str = "hsv_token";

/// Short-lived API token issued by the thermostat vendor
pub const ECOBEE_TOKEN_KEY: &str = "ecobee_token";

/// Long-lived browser session with the thermostat vendor
pub const ECOBEE_SESSION_KEY: &str = "ecobee_session";

/// Margin before expiry at which a token stops being reused
pub const SAFETY_MARGIN_SECS: i64 = 60;

/// Cache keys owned by a provider
pub fn keys_for(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Hsv => &[HSV_TOKEN_KEY],
        Provider::Ecobee => &[ECOBEE_TOKEN_KEY, ECOBEE_SESSION_KEY],
    }
}

/// Persisted token record
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Provider that issued the token
    pub provider: Provider,
    /// Opaque token or session value
    pub token: String,
    /// When the token was obtained
    pub issued_at: DateTime<Utc>,
    /// Provider-reported expiry; absent for browser sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token cache rooted at a directory
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    /// Create a cache storing files under `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load a cached token
    ///
    /// Missing, unreadable, corrupt and mismatched files all yield `None`.
    pub fn load(&self, key: &str) -> Option<CachedToken> {
        let path = self.path_for(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "No cached token");
                return None;
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Failed to read token cache, ignoring");
                return None;
            }
        };

        let cached: CachedToken = match serde_json::from_str(&contents) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Corrupt token cache, ignoring");
                return None;
            }
        };

        let expected = key.split('_').next().unwrap_or_default();
        if cached.provider.as_str() != expected {
            warn!(
                key,
                found = %cached.provider,
                "Token cache belongs to another provider, ignoring"
            );
            return None;
        }

        Some(cached)
    }

    /// Persist a token atomically
    pub fn save(&self, key: &str, token: &CachedToken) -> Result<(), AuthError> {
        let path = self.path_for(key);
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AuthError::Cache(format!("Failed to create {}: {e}", self.dir.display())))?;

        let json = serde_json::to_string_pretty(token)
            .map_err(|e| AuthError::Cache(format!("Failed to serialize token: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| AuthError::Cache(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| AuthError::Cache(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| AuthError::Cache(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| AuthError::Cache(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| AuthError::Cache(format!("Failed to persist {}: {e}", path.display())))?;

        sync_dir(&self.dir);

        info!(
            key,
            provider = %token.provider,
            expires_at = ?token.expires_at,
            "Token cached"
        );
        Ok(())
    }

    /// Delete a cached token; returns whether a file was removed
    pub fn clear(&self, key: &str) -> Result<bool, AuthError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(key, "Cached token removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AuthError::Cache(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    /// Whether `token` can still be used at `now`
    ///
    /// Tokens without an expiry are reused until the provider refuses them.
    pub fn is_valid(&self, token: &CachedToken, now: DateTime<Utc>) -> bool {
        match token.expires_at {
            Some(expires_at) => now + Duration::seconds(SAFETY_MARGIN_SECS) < expires_at,
            None => true,
        }
    }
}
