//! Service configuration at ~/.location-tracker/config.json.
//!
//! Every field has a default, so a partial file is fine and a missing file
//! means "all defaults".

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::tracking::{AccuracyClass, PowerClass, ProviderDescriptor, QualityTier, UpdateRequest};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Content of the foreground notice shown while tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub channel_id: String,
    pub channel_name: String,
    pub notification_id: u32,
    pub title: String,
    pub ticker: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            channel_id: "location-tracker".into(),
            channel_name: "Location tracking".into(),
            notification_id: 1001,
            title: "Location Service".into(),
            ticker: "Location Service".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub default_tier: QualityTier,
    /// Ignore providers the host reports as disabled.
    pub enabled_only: bool,
    /// Status line of the foreground notice; the provider name is appended.
    pub status_text: String,
    pub request: UpdateRequest,
    pub presence: PresenceConfig,
    /// Providers exposed by the simulated platform.
    pub providers: Vec<ProviderDescriptor>,
    /// Centre of the simulated track.
    pub origin: (f64, f64),
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_tier: QualityTier::Balanced,
            enabled_only: true,
            status_text: "Sharing location".into(),
            request: UpdateRequest::default(),
            presence: PresenceConfig::default(),
            providers: default_providers(),
            origin: (59.3293, 18.0686),
        }
    }
}

/// The provider set of a typical handset.
pub fn default_providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("gps", AccuracyClass::Fine, PowerClass::High)
            .with_capabilities(true, true, true),
        ProviderDescriptor::new("fused", AccuracyClass::Fine, PowerClass::Medium)
            .with_capabilities(true, true, true),
        ProviderDescriptor::new("network", AccuracyClass::Coarse, PowerClass::Low),
        ProviderDescriptor::new("passive", AccuracyClass::Coarse, PowerClass::Low),
    ]
}

impl ServiceConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".location-tracker")
            .join("config.json")
    }

    /// Write this configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = ServiceConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
        assert!(cfg.enabled_only);
        assert_eq!(cfg.request.max_updates, None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"default_tier":"high_accuracy","request":{"max_updates":3}}"#).unwrap();

        let cfg = ServiceConfig::load_from(&path).unwrap();
        assert_eq!(cfg.default_tier, QualityTier::HighAccuracy);
        assert_eq!(cfg.request.max_updates, Some(3));
        assert_eq!(cfg.request.interval_ms, 0);
        assert_eq!(cfg.presence, PresenceConfig::default());
        assert_eq!(cfg.providers.len(), 4);
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ServiceConfig::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = ServiceConfig::default();
        cfg.status_text = "Tracking".into();
        cfg.providers.truncate(1);
        cfg.save_to(&path).unwrap();

        let loaded = ServiceConfig::load_from(&path).unwrap();
        assert_eq!(loaded.status_text, "Tracking");
        assert_eq!(loaded.providers.len(), 1);
        assert_eq!(loaded.providers[0].name, "gps");
    }
}
