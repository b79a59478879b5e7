//! Configuration loading (`sokman.toml` plus environment overrides).
//!
//! Lookup order for the file: explicit `--config` path, `./sokman.toml`,
//! then `~/.config/sokman/sokman.toml`. A missing file is not an error; every
//! field has a default.

use crate::error::{Result, SokError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// File name searched for in the working directory and user config dir
pub const CONFIG_FILE_NAME: &str = "sokman.toml";

/// Assembled configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database file
    pub database: PathBuf,
    /// Local DBLP XML dump
    pub dump_path: PathBuf,
    /// Directory holding the `.choices.*.json` files
    pub choices_dir: PathBuf,
    /// Seconds to wait between Semantic Scholar requests
    pub throttle_secs: u64,
    /// Optional Semantic Scholar API key (`x-api-key`)
    pub semantic_scholar_api_key: Option<String>,
    /// Admin server settings
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("db.sqlite3"),
            dump_path: PathBuf::from("dblp").join("dblp-2021-03-01.xml"),
            choices_dir: PathBuf::from("."),
            throttle_secs: 2,
            semantic_scholar_api_key: None,
            server: ServerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Config {
    /// Load configuration, honouring an explicit path when given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(SokError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => discover(),
        };

        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            SokError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `SOKMAN_DB`, `SOKMAN_DUMP`, `SOKMAN_CHOICES_DIR` and
    /// `SEMANTIC_SCHOLAR_API_KEY`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("SOKMAN_DB") {
            self.database = PathBuf::from(db);
        }
        if let Some(dump) = lookup("SOKMAN_DUMP") {
            self.dump_path = PathBuf::from(dump);
        }
        if let Some(dir) = lookup("SOKMAN_CHOICES_DIR") {
            self.choices_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("SEMANTIC_SCHOLAR_API_KEY").filter(|k| !k.is_empty()) {
            self.semantic_scholar_api_key = Some(key);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            return Err(SokError::Config("`database` must not be empty".to_string()));
        }
        if self.server.host.is_empty() {
            return Err(SokError::Config("`server.host` must not be empty".to_string()));
        }
        Ok(())
    }

    /// Delay between consecutive Semantic Scholar requests
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    pub fn dblp_choices_path(&self) -> PathBuf {
        self.choices_dir.join(".choices.dblp.json")
    }

    pub fn semanticscholar_choices_path(&self) -> PathBuf {
        self.choices_dir.join(".choices.semanticscholar.json")
    }
}

fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("sokman").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.database, PathBuf::from("db.sqlite3"));
        assert_eq!(config.throttle(), Duration::from_secs(2));
        assert_eq!(config.server.port, 8000);
        assert!(config
            .dblp_choices_path()
            .ends_with(".choices.dblp.json"));
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "database = \"sok.db\"\nthrottle_secs = 5\n\n[server]\nport = 9000\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.database, PathBuf::from("sok.db"));
        assert_eq!(config.throttle_secs, 5);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "databse = \"typo.db\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(SokError::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/sokman.toml"))).unwrap_err();
        assert!(matches!(err, SokError::Config(_)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SOKMAN_DB", "other.db"),
            ("SEMANTIC_SCHOLAR_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database, PathBuf::from("other.db"));
        assert_eq!(config.semantic_scholar_api_key.as_deref(), Some("secret"));
        assert_eq!(config.dump_path, Config::default().dump_path);
    }
}
