use std::path::{Path, PathBuf};
use std::time::Duration;

use finger_config::{ConfigError, ResolvedConfig, ResolvedConfigWithSource};
use finger_core::capture::CapturePolicy;
use finger_core::errors::{AppError, AppResult};
use finger_core::sensor::SpoolSensorConfig;

/// Timing knobs the controller and its operations run with.
#[derive(Debug, Clone)]
pub struct KioskSettings {
    pub poll_interval: Duration,
    pub capture_poll: Duration,
    pub capture_timeout: Option<Duration>,
    pub message_hold: Duration,
    pub represent_delay: Duration,
    pub display_columns: usize,
}

impl KioskSettings {
    pub fn from_resolved(config: &ResolvedConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            capture_poll: config.capture_poll,
            capture_timeout: config.capture_timeout,
            message_hold: config.message_hold,
            represent_delay: config.represent_delay,
            display_columns: config.display_columns,
        }
    }

    /// The background scan waits for a finger indefinitely.
    pub fn background_capture(&self) -> CapturePolicy {
        CapturePolicy::unbounded(self.capture_poll)
    }

    /// Operator-driven captures give up after the configured timeout.
    pub fn foreground_capture(&self) -> CapturePolicy {
        CapturePolicy {
            poll_interval: self.capture_poll,
            timeout: self.capture_timeout,
        }
    }
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self::from_resolved(&ResolvedConfig::default())
    }
}

pub fn spool_sensor_config(config: &ResolvedConfig) -> SpoolSensorConfig {
    SpoolSensorConfig {
        spool_dir: config.spool_dir.clone(),
        capacity: config.storage_capacity,
        match_threshold: config.match_threshold,
    }
}

pub fn load_config(explicit: Option<&Path>) -> AppResult<ResolvedConfigWithSource> {
    let loaded = match explicit {
        Some(path) => finger_config::load_resolved_from_explicit(path),
        None => finger_config::load_resolved_config(),
    };
    loaded.map_err(map_config_error)
}

pub fn load_config_from_sources(sources: &[PathBuf]) -> AppResult<ResolvedConfigWithSource> {
    finger_config::load_resolved_from_paths(sources).map_err(map_config_error)
}

fn map_config_error(err: ConfigError) -> AppError {
    match err {
        ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
        ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn explicit_path_overrides_search_list() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");
        fs::write(&config_path, "spool_dir = \"/srv/spool\"\nstorage_capacity = 12").unwrap();

        let loaded = load_config(Some(&config_path)).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(config_path.as_path()));
        let sensor = spool_sensor_config(&loaded.resolved);
        assert_eq!(sensor.spool_dir, PathBuf::from("/srv/spool"));
        assert_eq!(sensor.capacity, 12);
    }

    #[test]
    fn parse_error_is_reported() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("broken.toml");
        fs::write(&config_path, "spool_dir = { not = 'toml' }").unwrap();

        let err = load_config_from_sources(&[config_path.clone()]).unwrap_err();
        match err {
            AppError::ConfigParse { path, .. } => assert_eq!(path, config_path),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn io_error_is_reported() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::create_dir_all(&config_path).unwrap();

        let err = load_config_from_sources(&[config_path.clone()]).unwrap_err();
        match err {
            AppError::ConfigRead { path, .. } => assert_eq!(path, config_path),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let loaded = load_config_from_sources(&[]).unwrap();
        assert!(loaded.source.is_none());
        let settings = KioskSettings::from_resolved(&loaded.resolved);
        assert_eq!(settings.poll_interval, Duration::from_millis(200));
        assert!(settings.background_capture().timeout.is_none());
        assert_eq!(
            settings.foreground_capture().timeout,
            Some(Duration::from_secs(30))
        );
    }
}
