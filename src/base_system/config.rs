//! Config file loading with commented default generation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub books: BooksConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination directory for generated books.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BooksConfig {
    /// Work URLs to fetch when none are given on the command line.
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_request_gap_ms")]
    pub min_request_gap_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Response cache directory. Empty disables the on-disk cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            min_request_gap_ms: default_min_request_gap_ms(),
            user_agent: default_user_agent(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    5
}

fn default_min_request_gap_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    // The upstream site serves plain markup to this agent.
    "node".to_string()
}

fn default_cache_dir() -> String {
    std::env::temp_dir()
        .join("scribblehub-epub")
        .join("http_cache")
        .to_string_lossy()
        .to_string()
}

/// Section comments written ahead of each top-level key when the default
/// config file is generated.
const SECTION_COMMENTS: &[(&str, &str)] = &[
    ("output", "Destination directory for generated EPUB files."),
    (
        "books",
        "Work URLs (series or chapter form) to download when none are passed as arguments.",
    ),
    (
        "network",
        "HTTP behavior: timeout (seconds), retry budget, minimum gap between\nlive requests (milliseconds), user agent, and response cache location.",
    ),
];

/// Load the config at `path`, creating a commented default file if absent.
pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let default_config = AppConfig::default();
        write_with_comments(&default_config, path)?;
        return Ok(default_config);
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_with_comments(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let yaml = serde_yaml::to_string(config).unwrap_or_default();
    let mut lines = Vec::new();
    for line in yaml.lines() {
        if let Some((_, comment)) = SECTION_COMMENTS
            .iter()
            .find(|(key, _)| line.starts_with(key) && line[key.len()..].starts_with(':'))
        {
            lines.push(format!("# {}", comment.replace('\n', "\n# ")));
        }
        lines.push(line.to_string());
    }

    fs::write(path, lines.join("\n")).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
