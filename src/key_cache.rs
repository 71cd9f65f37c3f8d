//! Auto-generated API key cache
//!
//! When the server starts with no API key and no IP whitelist, a key is
//! generated once and persisted to `~/.gmail-oauth-proxy/config.json` so
//! clients keep working across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Directory under the home directory holding the cache
pub const CACHE_DIR_NAME: &str = ".gmail-oauth-proxy";

/// Cache file name
pub const CACHE_FILE_NAME: &str = "config.json";

/// Prefix identifying generated keys
pub const KEY_PREFIX: &str = "gop_";

const CACHE_VERSION: &str = "1.0.0";
const CACHE_DESCRIPTION: &str = "Auto-generated API key for Gmail OAuth Proxy Server";

/// Cached key record as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedApiKey {
    /// The key
    pub api_key: String,
    /// When the key was generated
    pub created_at: DateTime<Utc>,
    /// Last time the key was loaded
    pub last_used: DateTime<Utc>,
    /// Cache format version
    pub version: String,
    /// Free-form description
    pub description: String,
}

/// API key cache rooted at a directory
#[derive(Debug, Clone)]
pub struct ApiKeyCache {
    dir: PathBuf,
}

impl ApiKeyCache {
    /// Cache in the default location (`~/.gmail-oauth-proxy`)
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Cache("Cannot determine home directory".to_string()))?;
        Ok(Self::with_dir(home.join(CACHE_DIR_NAME)))
    }

    /// Cache rooted at `dir`
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file path
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE_NAME)
    }

    /// Generate a fresh key: `gop_` followed by 64 hex characters
    #[must_use]
    pub fn generate_api_key() -> String {
        let bytes: [u8; 32] = rand::random();
        format!("{KEY_PREFIX}{}", hex::encode(bytes))
    }

    /// Persist `api_key` as a new record
    pub fn save(&self, api_key: &str) -> Result<CachedApiKey> {
        let now = Utc::now();
        let record = CachedApiKey {
            api_key: api_key.to_string(),
            created_at: now,
            last_used: now,
            version: CACHE_VERSION.to_string(),
            description: CACHE_DESCRIPTION.to_string(),
        };
        self.write(&record)?;
        info!(path = %self.file_path().display(), "Saved API key to cache");
        Ok(record)
    }

    /// Load the cached record, bumping `last_used`
    ///
    /// Failing to record the new `last_used` is logged, not returned.
    pub fn load(&self) -> Result<CachedApiKey> {
        let path = self.file_path();
        if !path.exists() {
            return Err(Error::Cache(format!(
                "Cache file does not exist: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Cache(format!("Failed to read cache file: {e}")))?;
        let mut record: CachedApiKey = serde_json::from_str(&content)
            .map_err(|e| Error::Cache(format!("Failed to parse cache file: {e}")))?;

        record.last_used = Utc::now();
        if let Err(e) = self.write(&record) {
            warn!(error = %e, "Failed to update API key last-used time");
        }

        debug!(path = %path.display(), "Loaded API key from cache");
        Ok(record)
    }

    /// Whether a cache file exists
    #[must_use]
    pub fn exists(&self) -> bool {
        self.file_path().exists()
    }

    /// Delete the cache file; returns whether anything was removed
    pub fn clear(&self) -> Result<bool> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| Error::Cache(format!("Failed to remove cache file: {e}")))?;
        info!(path = %path.display(), "Cleared API key cache");
        Ok(true)
    }

    /// Check that the cache holds a usable key
    pub fn validate(&self) -> Result<()> {
        let record = self.load()?;
        if record.api_key.trim().is_empty() {
            return Err(Error::Cache("Cached API key is empty".to_string()));
        }
        Ok(())
    }

    /// Return the cached key, generating and saving one if the cache is
    /// missing or unusable
    ///
    /// The flag is `true` when the key was generated by this call.
    pub fn get_or_generate(&self) -> Result<(String, bool)> {
        match self.load() {
            Ok(record) if !record.api_key.trim().is_empty() => return Ok((record.api_key, false)),
            Ok(_) => warn!("Cached API key is empty, generating a new one"),
            Err(e) => debug!(error = %e, "No usable cached API key"),
        }

        let api_key = Self::generate_api_key();
        self.save(&api_key)?;
        Ok((api_key, true))
    }

    fn write(&self, record: &CachedApiKey) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Cache(format!("Failed to create cache directory: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700));
        }

        let path = self.file_path();
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content)
            .map_err(|e| Error::Cache(format!("Failed to write cache file: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}
