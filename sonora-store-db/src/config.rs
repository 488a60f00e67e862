// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating a [`StoreConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory that holds scratch project files for unsaved projects
    pub temp_dir: PathBuf,

    /// Compact only when live blocks make up at most this percentage of
    /// the block table
    pub compact_threshold: u8,

    /// WAL auto-checkpoint interval in pages
    pub wal_autocheckpoint: u32,

    /// How often a background open polls the cancellation callback
    pub open_poll_interval_ms: u64,

    /// Extension given to scratch project files
    pub file_extension: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("sonora"),
            compact_threshold: 80,
            wal_autocheckpoint: 1000,
            open_poll_interval_ms: 50,
            file_extension: "sonora".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: StoreConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.compact_threshold) {
            return Err(ConfigError::Invalid(format!(
                "compact_threshold must be between 1 and 100, got {}",
                self.compact_threshold
            )));
        }
        if self.open_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "open_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.file_extension.is_empty() || self.file_extension.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "file_extension {:?} is not a valid extension",
                self.file_extension
            )));
        }
        Ok(())
    }

    pub fn open_poll_interval(&self) -> Duration {
        Duration::from_millis(self.open_poll_interval_ms)
    }

    /// Whether `path` lives directly inside the scratch directory.
    pub fn is_temporary_path(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_owned());
        canonical(parent) == canonical(&self.temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonora.toml");
        std::fs::write(&path, "compact_threshold = 50\n").unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.wal_autocheckpoint, 1000);
        assert_eq!(config.open_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.file_extension, "sonora");
    }

    #[rstest]
    #[case::zero_threshold("compact_threshold = 0")]
    #[case::over_hundred("compact_threshold = 101")]
    #[case::zero_poll("open_poll_interval_ms = 0")]
    #[case::empty_extension("file_extension = \"\"")]
    fn test_invalid_values_rejected(#[case] contents: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonora.toml");
        std::fs::write(&path, contents).unwrap();

        assert!(matches!(
            StoreConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonora.toml");
        std::fs::write(&path, "compact_threshold = [").unwrap();

        assert!(matches!(
            StoreConfig::from_file(&path),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = StoreConfig::from_file(Path::new("/nonexistent/sonora.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_temporary_path_detection() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            temp_dir: dir.path().to_owned(),
            ..StoreConfig::default()
        };

        assert!(config.is_temporary_path(&dir.path().join("untitled.sonora")));
        assert!(!config.is_temporary_path(&dir.path().join("nested/untitled.sonora")));
        assert!(!config.is_temporary_path(Path::new("/home/user/song.sonora")));
    }
}
