//! Configuration module
//!
//! Handles loading and saving oscope configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Console rendering settings
    #[serde(default)]
    pub display: DisplayConfig,

    /// Socket settings
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Console rendering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Use ANSI colors and text attributes
    #[serde(default = "default_true")]
    pub color: bool,
    /// Decimal places shown for float arguments
    #[serde(default = "default_float_precision")]
    pub float_precision: usize,
    /// Spaces per bundle nesting level
    #[serde(default = "default_indent")]
    pub indent: usize,
    /// Show timestamps in UTC instead of local time
    #[serde(default)]
    pub utc: bool,
    /// Print a hex dump of every received datagram
    #[serde(default)]
    pub hex_dump: bool,
}

fn default_true() -> bool {
    true
}

fn default_float_precision() -> usize {
    3
}

fn default_indent() -> usize {
    2
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: default_true(),
            float_precision: default_float_precision(),
            indent: default_indent(),
            utc: false,
            hex_dump: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Largest datagram we can receive
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Host used by `listen` and `snoop` when only a port is given
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Host used by `talk` when only a port is given
    #[serde(default = "default_talk_host")]
    pub talk_host: String,
    /// Relay routes with no traffic for this long are closed; 0 keeps them
    /// until the relay stops
    #[serde(default = "default_route_idle_timeout_ms")]
    pub route_idle_timeout_ms: u64,
}

fn default_recv_buffer_size() -> usize {
    65_536
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_talk_host() -> String {
    "127.0.0.1".to_string()
}

fn default_route_idle_timeout_ms() -> u64 {
    300_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: default_recv_buffer_size(),
            listen_host: default_listen_host(),
            talk_host: default_talk_host(),
            route_idle_timeout_ms: default_route_idle_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("oscope/config.toml")),
            Some(PathBuf::from("./oscope.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first of `paths` that exists; a broken file is an error,
    /// not a reason to try the next one
    fn load_first(paths: &[PathBuf]) -> ConfigResult<Self> {
        for path in paths {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Configuration written by `oscope config --generate`
pub fn sample_config() -> Config {
    Config {
        display: DisplayConfig {
            float_precision: 4,
            utc: true,
            ..Default::default()
        },
        network: NetworkConfig {
            talk_host: "192.168.1.20".to_string(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.recv_buffer_size, 65_536);
        assert_eq!(config.display.float_precision, 3);
        assert!(config.display.color);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.display.indent = 4;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[display]\ncolor = false").unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert!(!loaded.display.color);
        assert_eq!(loaded.display.indent, 2);
        assert_eq!(loaded.network, NetworkConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/oscope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_first_skips_missing_paths() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nrecv_buffer_size = 1024").unwrap();

        let paths = [
            PathBuf::from("/nonexistent/oscope.toml"),
            file.path().to_path_buf(),
        ];
        let loaded = Config::load_first(&paths).unwrap();
        assert_eq!(loaded.network.recv_buffer_size, 1024);

        let none = Config::load_first(&[PathBuf::from("/nonexistent/oscope.toml")]).unwrap();
        assert_eq!(none, Config::default());
    }

    #[test]
    fn test_load_first_reports_broken_file() {
        let mut broken = NamedTempFile::new().unwrap();
        writeln!(broken, "[display\ncolor = maybe").unwrap();
        let good = NamedTempFile::new().unwrap();

        let paths = [broken.path().to_path_buf(), good.path().to_path_buf()];
        let err = Config::load_first(&paths).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_sample_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/oscope.toml");

        sample_config().save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), sample_config());
    }

    #[test]
    fn test_sample_config() {
        let sample = toml::to_string_pretty(&sample_config()).unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.display.float_precision, 4);
        assert_eq!(parsed.network.talk_host, "192.168.1.20");
    }
}
