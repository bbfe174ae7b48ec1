//! Sync configuration management.
//!
//! Handles loading, saving, and validating the settings that shape device
//! synchronization: where music lives on the device, how playlists are
//! written, upload limits and retry timings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::playlist::PathStyle;
use crate::retry::RetryPolicy;

/// Largest payload accepted for upload (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Payloads above this size get a truncated partial send as last resort (1 MiB).
pub const DEFAULT_PARTIAL_TRANSFER_BYTES: u64 = 1024 * 1024;

/// Upload size limits and send/register retry timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    /// Largest payload accepted for upload.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Payloads above this size may be partially sent after every full
    /// send attempt failed.
    #[serde(default = "default_partial_transfer_bytes")]
    pub partial_transfer_bytes: u64,
    /// Metadata registration attempts.
    #[serde(default = "default_register_attempts")]
    pub register_attempts: u32,
    /// Wait between registration attempts, in milliseconds.
    #[serde(default = "default_register_retry_delay_ms")]
    pub register_retry_delay_ms: u64,
    /// Wait before the last full send attempt, in milliseconds.
    #[serde(default = "default_send_retry_delay_ms")]
    pub send_retry_delay_ms: u64,
    /// Re-read metadata after sending to compare sizes.
    #[serde(default = "default_true")]
    pub verify_after_send: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            partial_transfer_bytes: DEFAULT_PARTIAL_TRANSFER_BYTES,
            register_attempts: default_register_attempts(),
            register_retry_delay_ms: default_register_retry_delay_ms(),
            send_retry_delay_ms: default_send_retry_delay_ms(),
            verify_after_send: true,
        }
    }
}

impl TransferConfig {
    /// Policy for metadata registration.
    #[must_use]
    pub const fn register_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.register_attempts,
            Duration::from_millis(self.register_retry_delay_ms),
        )
    }

    /// Policy for full sends: fresh reader right away, then one delayed retry.
    #[must_use]
    pub const fn send_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(self.send_retry_delay_ms))
            .with_immediate_first_retry()
    }
}

/// Timings for a retried primitive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts.
    pub attempts: u32,
    /// Wait between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl RetryConfig {
    /// Convert to a [`RetryPolicy`].
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Name of the music folder at the storage root.
    #[serde(default = "default_music_folder")]
    pub music_folder: String,
    /// Roots scanned when building a catalog.
    #[serde(default = "default_scan_roots")]
    pub scan_roots: Vec<String>,
    /// How playlist entries are written.
    #[serde(default)]
    pub path_style: PathStyle,
    /// Bound on opening a device session, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Bound on enumerating storages, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub storage_timeout_secs: u64,
    /// Upload settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Delete retry timings.
    #[serde(default = "default_delete_retry")]
    pub delete_retry: RetryConfig,
    /// Listing retry timings.
    #[serde(default = "default_listing_retry")]
    pub listing_retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            music_folder: default_music_folder(),
            scan_roots: default_scan_roots(),
            path_style: PathStyle::default(),
            session_timeout_secs: default_timeout_secs(),
            storage_timeout_secs: default_timeout_secs(),
            transfer: TransferConfig::default(),
            delete_retry: default_delete_retry(),
            listing_retry: default_listing_retry(),
        }
    }
}

impl SyncConfig {
    /// Session acquisition bound.
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Storage enumeration bound.
    #[must_use]
    pub const fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Logical path of the music root, e.g. `/Music`.
    #[must_use]
    pub fn music_root_path(&self) -> String {
        format!("/{}", self.music_folder.trim_matches('/'))
    }

    /// Check the configuration for values that would make operations unsafe
    /// or impossible.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let music = self.music_folder.trim_matches('/');
        if music.is_empty() || music.contains('/') {
            return Err(Error::Configuration(format!(
                "music_folder must be a single folder name, got '{}'",
                self.music_folder
            )));
        }
        if self.scan_roots.is_empty() {
            return Err(Error::Configuration(
                "scan_roots must list at least one root".to_string(),
            ));
        }
        if self.transfer.max_upload_bytes == 0 {
            return Err(Error::Configuration(
                "transfer.max_upload_bytes must be positive".to_string(),
            ));
        }
        if self.transfer.partial_transfer_bytes > self.transfer.max_upload_bytes {
            return Err(Error::Configuration(
                "transfer.partial_transfer_bytes cannot exceed max_upload_bytes".to_string(),
            ));
        }
        if self.session_timeout_secs == 0 || self.storage_timeout_secs == 0 {
            return Err(Error::Configuration(
                "timeouts must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the default location, or create defaults if
    /// not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, or create defaults if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!(
            "Music folder: {}, path style: {}",
            config.music_folder, config.path_style
        );

        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the path to the default config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

fn default_music_folder() -> String {
    "Music".to_string()
}

fn default_scan_roots() -> Vec<String> {
    vec!["/Music".to_string()]
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

const fn default_partial_transfer_bytes() -> u64 {
    DEFAULT_PARTIAL_TRANSFER_BYTES
}

const fn default_register_attempts() -> u32 {
    3
}

const fn default_register_retry_delay_ms() -> u64 {
    1000
}

const fn default_send_retry_delay_ms() -> u64 {
    2000
}

const fn default_delete_retry() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        delay_ms: 500,
    }
}

const fn default_listing_retry() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        delay_ms: 100,
    }
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("bettersync")
        .join("config.json")
}

/// Configuration manager that handles loading and caching config.
pub struct ConfigManager {
    config: SyncConfig,
    path: PathBuf,
}

impl ConfigManager {
    /// Create a manager backed by the default config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded.
    pub fn new() -> Result<Self> {
        Self::with_path(config_file_path())
    }

    /// Create a manager backed by `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let config = SyncConfig::load_from(&path)?;
        Ok(Self { config, path })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Replace and persist the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or cannot be saved.
    pub fn update(&mut self, config: SyncConfig) -> Result<()> {
        config.validate()?;
        config.save_to(&self.path)?;
        self.config = config;
        Ok(())
    }

    /// Change the playlist path style and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn set_path_style(&mut self, style: PathStyle) -> Result<()> {
        let mut config = self.config.clone();
        config.path_style = style;
        self.update(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.music_folder, "Music");
        assert_eq!(config.music_root_path(), "/Music");
        assert_eq!(config.path_style, PathStyle::DriveUpper);
        assert_eq!(config.transfer.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.session_timeout(), Duration::from_secs(30));
        assert_eq!(config.delete_retry.policy().max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("config.json");

        let config = SyncConfig::load_from(&path).expect("load");
        assert_eq!(config, SyncConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"music_folder": "Audio", "path_style": "relative"}"#)
            .expect("write");

        let config = SyncConfig::load_from(&path).expect("load");
        assert_eq!(config.music_folder, "Audio");
        assert_eq!(config.path_style, PathStyle::Relative);
        assert_eq!(config.scan_roots, vec!["/Music".to_string()]);
        assert_eq!(config.transfer, TransferConfig::default());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"music_folder": "a/b"}"#).expect("write");

        assert!(matches!(
            SyncConfig::load_from(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_manager_persists_updates() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.json");

        let mut manager = ConfigManager::with_path(path.clone()).expect("manager");
        manager
            .set_path_style(PathStyle::DrivePreserveCase)
            .expect("update");

        let reloaded = SyncConfig::load_from(&path).expect("reload");
        assert_eq!(reloaded.path_style, PathStyle::DrivePreserveCase);
        assert_eq!(manager.config().path_style, PathStyle::DrivePreserveCase);
    }

    #[test]
    fn test_send_policy_schedule() {
        let policy = TransferConfig::default().send_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_before(2), Duration::ZERO);
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
    }
}
