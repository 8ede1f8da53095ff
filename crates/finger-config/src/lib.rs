use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/finger-kiosk/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/finger-kiosk/config.toml";
pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 200;
pub const DEFAULT_CAPTURE_POLL_MILLIS: u64 = 50;
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MESSAGE_HOLD_MILLIS: u64 = 2000;
pub const DEFAULT_REPRESENT_DELAY_MILLIS: u64 = 3000;
pub const DEFAULT_MODEL_PATH: &str = "/var/lib/finger-kiosk/liveness.pt";
pub const DEFAULT_SPOOL_DIR: &str = "/var/lib/finger-kiosk/spool";
pub const DEFAULT_TEMPLATE_STORE: &str = "/var/lib/finger-kiosk/templates.json";
pub const DEFAULT_STORAGE_CAPACITY: u32 = 1000;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.92;
pub const DEFAULT_DISPLAY_COLUMNS: usize = 20;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub poll_interval_millis: Option<u64>,
    pub capture_poll_millis: Option<u64>,
    pub capture_timeout_secs: Option<u64>,
    pub message_hold_millis: Option<u64>,
    pub represent_delay_millis: Option<u64>,
    pub spoof_check_enabled: Option<bool>,
    pub model_path: Option<PathBuf>,
    pub spool_dir: Option<PathBuf>,
    pub template_store: Option<PathBuf>,
    pub storage_capacity: Option<u32>,
    pub match_threshold: Option<f64>,
    pub display_columns: Option<usize>,
    pub audit_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub poll_interval: Duration,
    pub capture_poll: Duration,
    /// Zero disables the timeout for foreground captures.
    pub capture_timeout: Option<Duration>,
    pub message_hold: Duration,
    pub represent_delay: Duration,
    pub spoof_check_enabled: bool,
    pub model_path: PathBuf,
    pub spool_dir: PathBuf,
    pub template_store: PathBuf,
    pub storage_capacity: u32,
    pub match_threshold: f64,
    pub display_columns: usize,
    pub audit_dir: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let capture_timeout_secs = raw
            .capture_timeout_secs
            .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS);
        Self {
            poll_interval: Duration::from_millis(
                raw.poll_interval_millis
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MILLIS)
                    .max(1),
            ),
            capture_poll: Duration::from_millis(
                raw.capture_poll_millis
                    .unwrap_or(DEFAULT_CAPTURE_POLL_MILLIS)
                    .max(1),
            ),
            capture_timeout: (capture_timeout_secs > 0)
                .then(|| Duration::from_secs(capture_timeout_secs)),
            message_hold: Duration::from_millis(
                raw.message_hold_millis
                    .unwrap_or(DEFAULT_MESSAGE_HOLD_MILLIS),
            ),
            represent_delay: Duration::from_millis(
                raw.represent_delay_millis
                    .unwrap_or(DEFAULT_REPRESENT_DELAY_MILLIS),
            ),
            spoof_check_enabled: raw.spoof_check_enabled.unwrap_or(false),
            model_path: raw
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            spool_dir: raw
                .spool_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOOL_DIR)),
            template_store: raw
                .template_store
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_STORE)),
            storage_capacity: raw
                .storage_capacity
                .unwrap_or(DEFAULT_STORAGE_CAPACITY)
                .max(1),
            match_threshold: raw
                .match_threshold
                .unwrap_or(DEFAULT_MATCH_THRESHOLD)
                .clamp(0.0, 1.0),
            display_columns: raw
                .display_columns
                .unwrap_or(DEFAULT_DISPLAY_COLUMNS)
                .max(1),
            audit_dir: raw.audit_dir,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub fn default_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_paths())
}

/// An explicit path must exist; the default search list may be empty.
pub fn load_resolved_from_explicit(path: &Path) -> Result<ResolvedConfigWithSource, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_config(path, &contents)?;
    Ok(ResolvedConfigWithSource {
        resolved: ResolvedConfig::from_raw(parsed),
        source: Some(path.to_path_buf()),
    })
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed = parse_config(path, &contents)?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        }),
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}

fn parse_config(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str::<ConfigFile>(contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
