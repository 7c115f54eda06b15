//! Configuration loading and data directory resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overrides
pub const ENV_DATA_DIR: &str = "STOREBOARD_DATA_DIR";
pub const ENV_REMOTE_URL: &str = "STOREBOARD_REMOTE_URL";
pub const ENV_API_KEY: &str = "STOREBOARD_API_KEY";
pub const ENV_DEVICE_ID: &str = "STOREBOARD_DEVICE_ID";

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Raw configuration file contents (all fields optional)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub data_dir: Option<String>,
    pub device_id: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
    pub table_prefix: Option<String>,
}

impl FileConfig {
    /// Parse a TOML configuration file
    pub fn load(path: &Path) -> Result<FileConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }
}

/// Command-line overrides passed through from the binary
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<String>,
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub device_id: Option<String>,
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    pub device_id: Option<String>,
    pub heartbeat_interval_secs: u64,
    /// Prefix prepended to collection names to form remote table names
    pub table_prefix: String,
}

impl ClientConfig {
    /// Resolve configuration with priority order:
    /// 1. Command-line argument (highest priority)
    /// 2. Environment variable
    /// 3. TOML config file
    /// 4. Compiled default (fallback)
    pub fn resolve(overrides: Overrides) -> Result<ClientConfig> {
        let file = match &overrides.config_path {
            // An explicitly requested config file must parse
            Some(path) => FileConfig::load(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => FileConfig::load(&path).unwrap_or_else(|e| {
                    warn!("Ignoring unreadable config file: {}", e);
                    FileConfig::default()
                }),
                _ => FileConfig::default(),
            },
        };

        let data_dir = overrides
            .data_dir
            .or_else(|| std::env::var(ENV_DATA_DIR).ok())
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(ClientConfig {
            remote_url: overrides
                .remote_url
                .or_else(|| std::env::var(ENV_REMOTE_URL).ok())
                .or(file.remote_url),
            api_key: overrides
                .api_key
                .or_else(|| std::env::var(ENV_API_KEY).ok())
                .or(file.api_key),
            data_dir,
            device_id: overrides
                .device_id
                .or_else(|| std::env::var(ENV_DEVICE_ID).ok())
                .or(file.device_id),
            heartbeat_interval_secs: file
                .heartbeat_interval_secs
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            table_prefix: file.table_prefix.unwrap_or_default(),
        })
    }

    /// Whether remote operations should be attempted at all.
    ///
    /// Deployment tooling has been observed injecting the literal strings
    /// "undefined" and "null" for unset values; treat those as absent.
    pub fn is_remote_configured(&self) -> bool {
        fn usable(value: &Option<String>) -> bool {
            match value.as_deref() {
                Some(v) => !v.is_empty() && v != "undefined" && v != "null",
                None => false,
            }
        }
        usable(&self.remote_url) && usable(&self.api_key)
    }
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("storeboard").join("config.toml"))
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("storeboard"))
        .unwrap_or_else(|| PathBuf::from("./storeboard_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
remote_url = "https://backend.example.com"
api_key = "anon-key"
heartbeat_interval_secs = 15
table_prefix = "app_8c186_"
"#,
        )
        .unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://backend.example.com")
        );
        assert_eq!(config.heartbeat_interval_secs, Some(15));
        assert_eq!(config.table_prefix.as_deref(), Some("app_8c186_"));
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_remote_configured_rejects_placeholders() {
        let mut config = ClientConfig {
            remote_url: Some("https://backend.example.com".to_string()),
            api_key: Some("anon-key".to_string()),
            data_dir: PathBuf::from("/tmp"),
            device_id: None,
            heartbeat_interval_secs: 30,
            table_prefix: String::new(),
        };
        assert!(config.is_remote_configured());

        config.api_key = Some("undefined".to_string());
        assert!(!config.is_remote_configured());

        config.api_key = None;
        assert!(!config.is_remote_configured());

        config.api_key = Some("anon-key".to_string());
        config.remote_url = Some(String::new());
        assert!(!config.is_remote_configured());
    }

    #[test]
    fn test_explicit_config_path_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "remote_url = [not toml").unwrap();

        let overrides = Overrides {
            config_path: Some(path),
            ..Overrides::default()
        };
        assert!(ClientConfig::resolve(overrides).is_err());
    }
}
