use std::{
    env, fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use keystash_core::ConnectionOptions;
use serde::{Deserialize, Serialize};

/// Environment fallback when neither the flag nor the config file names a server.
pub const CONNECTION_STRING_ENV: &str = "KEYSTASH_CONNECTION_STRING";

/// User-level configuration loaded from `~/.config/keystash/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// MongoDB connection string, e.g. `mongodb://localhost:27017/keystash`.
    pub connection_string: Option<String>,
}

impl Config {
    /// Flag wins over the config file; the environment is the last resort.
    pub fn connection_options(&self, flag: Option<String>) -> ConnectionOptions {
        let connection_string = flag
            .or_else(|| self.connection_string.clone())
            .or_else(|| env::var(CONNECTION_STRING_ENV).ok());
        ConnectionOptions { connection_string }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("keystash").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    let path = default_path()?;
    write_to_path_if_missing(config, &path)?;
    Ok(path)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(())
}
