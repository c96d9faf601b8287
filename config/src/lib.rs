//! Configuration loading for tagblock.
//!
//! ```toml
//! [app]
//! data_dir = "${HOME}/.tagblock/data"
//!
//! [reader]
//! scan_timeout_secs = 60
//!
//! [logging]
//! filter = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

pub const DATA_DIR_ENV: &str = "TAGBLOCK_DATA_DIR";
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize)]
pub struct TagblockConfig {
    pub app: Option<AppConfig>,
    pub reader: Option<ReaderConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Directory holding profile and lock documents. `${VAR}` references are expanded.
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReaderConfig {
    /// Seconds before an unanswered scan is cancelled. 0 disables the timeout.
    pub scan_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

impl TagblockConfig {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        Self::parse(&content)
            .map(Some)
            .map_err(|source| {
                tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Resolve the data directory: env override, config, home default, cwd fallback.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = env::var(DATA_DIR_ENV)
            && !dir.trim().is_empty()
        {
            return PathBuf::from(dir);
        }
        if let Some(dir) = self.app.as_ref().and_then(|app| app.data_dir.as_deref()) {
            let expanded = expand_env_vars(dir);
            if !expanded.trim().is_empty() {
                return PathBuf::from(expanded);
            }
            tracing::warn!("Configured data_dir expanded to an empty path; using default");
        }
        default_data_dir()
    }

    /// `None` means scans wait until cancelled.
    #[must_use]
    pub fn scan_timeout(&self) -> Option<Duration> {
        let secs = self
            .reader
            .as_ref()
            .and_then(|reader| reader.scan_timeout_secs)
            .unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.logging
            .as_ref()
            .and_then(|logging| logging.filter.as_deref())
            .filter(|filter| !filter.trim().is_empty())
    }
}

#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tagblock"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    config_dir().map_or_else(
        || PathBuf::from(".tagblock").join("data"),
        |dir| dir.join("data"),
    )
}
