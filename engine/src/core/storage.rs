//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\GeoFilter\` | `~/Library/Application Support/GeoFilter/` | `$XDG_DATA_HOME/geofilter/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::config::AppConfig;
use super::constants::{
    APP_DOT_FOLDER, APP_NAME, EMBEDDED_DB_FILE_NAME, ENV_DATA_DIR, SCRATCH_DIR_NAME,
    SESSION_FILE_NAME, SUBSETS_FILE_NAME,
};
use crate::utils::file::expand_path;

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage with platform-appropriate data directory
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let data_dir = Self::resolve_data_dir();

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        let scratch_dir = config
            .database
            .scratch_dir
            .clone()
            .unwrap_or_else(|| data_dir.join(SCRATCH_DIR_NAME));
        tokio::fs::create_dir_all(&scratch_dir).await.with_context(|| {
            format!(
                "Failed to create scratch directory: {}",
                scratch_dir.display()
            )
        })?;

        tracing::debug!(
            data_dir = %data_dir.display(),
            scratch_dir = %scratch_dir.display(),
            "Storage initialized"
        );

        Ok(Self {
            data_dir,
            scratch_dir,
        })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to local .geofilter
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory for embedded temporary objects
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE_NAME)
    }

    pub fn subsets_path(&self) -> PathBuf {
        self.data_dir.join(SUBSETS_FILE_NAME)
    }

    /// Embedded database file, unless the configuration names one
    pub fn embedded_db_path(&self, config: &AppConfig) -> PathBuf {
        config
            .database
            .embedded_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(EMBEDDED_DB_FILE_NAME))
    }

    /// Create AppStorage for testing with a specific data directory
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        let scratch_dir = data_dir.join(SCRATCH_DIR_NAME);
        Self {
            data_dir,
            scratch_dir,
        }
    }
}
