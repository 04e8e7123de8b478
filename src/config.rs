use crate::interpret::InterpretOptions;
use crate::manifest::DatasetLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "LFV_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CliConfig {
    #[serde(default)]
    pub interpret: InterpretOptions,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub dataset_dir: PathBuf,
    #[serde(flatten)]
    pub layout: DatasetLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub staging_root: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset-files"),
            layout: DatasetLayout::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("staging"),
        }
    }
}

impl CliConfig {
    /// Load from `$LFV_CONFIG` or the user config directory, falling back
    /// to defaults when there is no usable file.
    pub fn load() -> Self {
        let Some(config_path) = Self::config_file_path() else {
            return Self::default();
        };
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring config: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn config_file_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        Self::config_dir().map(|mut path| {
            path.push("config.toml");
            path
        })
    }

    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("lfv");
            path
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpret::ChannelOrder;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.interpret.area_threshold, 0.01);
        assert!(config.interpret.mask_expected);
        assert_eq!(config.interpret.channel_order, ChannelOrder::Rgb);
        assert_eq!(config.dataset.dataset_dir, PathBuf::from("dataset-files"));
        assert_eq!(
            config.dataset.layout.template_manifest,
            PathBuf::from("manifests/template.manifest")
        );
        assert_eq!(config.upload.staging_root, PathBuf::from("staging"));
    }

    #[test]
    fn test_config_serialization() {
        let config = CliConfig::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[interpret]"));
        assert!(toml_str.contains("[dataset]"));
        assert!(toml_str.contains("[upload]"));

        assert!(toml_str.contains("mask_expected = true"));
        assert!(toml_str.contains("channel_order = \"rgb\""));
        assert!(toml_str.contains("train_manifest = \"manifests/train.manifest\""));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
[interpret]
area_threshold = 0.05
mask_expected = false
channel_order = "bgr"

[dataset]
dataset_dir = "/data/cookies"
template_manifest = "m/template.jsonl"
train_manifest = "m/train.jsonl"

[upload]
staging_root = "/srv/staging"
"#;

        let config: CliConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interpret.area_threshold, 0.05);
        assert!(!config.interpret.mask_expected);
        assert_eq!(config.interpret.channel_order, ChannelOrder::Bgr);
        assert_eq!(config.dataset.dataset_dir, PathBuf::from("/data/cookies"));
        assert_eq!(
            config.dataset.layout.train_manifest,
            PathBuf::from("m/train.jsonl")
        );
        assert_eq!(config.upload.staging_root, PathBuf::from("/srv/staging"));
    }

    #[test]
    fn test_config_partial_deserialization() {
        let toml_str = r#"
[interpret]
area_threshold = 0.2
"#;

        let config: CliConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interpret.area_threshold, 0.2);
        assert!(config.interpret.mask_expected);
        assert_eq!(config.dataset, DatasetConfig::default());
        assert_eq!(config.upload, UploadConfig::default());
    }

    #[test]
    fn test_interpret_section_matches_option_defaults() {
        let config: CliConfig = toml::from_str("[interpret]\n").unwrap();
        assert_eq!(config.interpret, InterpretOptions::default());
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[interpret\n").unwrap();
        assert!(matches!(
            CliConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_override_is_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lfv.toml");
        std::fs::write(&path, "[upload]\nstaging_root = \"/tmp/mirror\"\n").unwrap();

        temp_env::with_var(CONFIG_ENV, Some(path.as_os_str()), || {
            assert_eq!(CliConfig::config_file_path(), Some(path.clone()));
            let config = CliConfig::load();
            assert_eq!(config.upload.staging_root, PathBuf::from("/tmp/mirror"));
        });
    }

    #[test]
    #[serial]
    fn test_broken_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lfv.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        temp_env::with_var(CONFIG_ENV, Some(path.as_os_str()), || {
            assert_eq!(CliConfig::load(), CliConfig::default());
        });
    }
}
