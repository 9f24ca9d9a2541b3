//! Persistent session configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Result, SessionError};

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Session controller behavior.
    pub session: SessionConfig,
    #[serde(default)]
    /// Log output preferences.
    pub logging: LoggingConfig,
}

/// Session controller behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionConfig {
    /// Interval between elapsed/duration refreshes.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Capacity of the broadcast bus shared by the controller and its collaborators.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// End a cast session that is already connected when a new video loads.
    #[serde(default = "default_true")]
    pub end_existing_cast_on_load: bool,
    /// Start local playback as soon as the item is loaded.
    #[serde(default = "default_true")]
    pub autoplay_on_load: bool,
}

/// Log output preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            bus_capacity: default_bus_capacity(),
            end_existing_cast_on_load: true,
            autoplay_on_load: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Parsed level filter; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level
            .trim()
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Default location, `<config dir>/castlane/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("castlane").join("config.toml"))
    }

    /// Parses TOML text, falling back to defaults when it is malformed.
    pub fn from_toml_or_default(content: &str) -> Self {
        match toml::from_str::<Config>(content) {
            Ok(config) => sanitize_config(config),
            Err(err) => {
                warn!("Config: failed to parse config, using defaults: {}", err);
                Config::default()
            }
        }
    }

    /// Loads the config at `path`, writing defaults first if the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "Config file not found. Creating default config. path={}",
                path.display()
            );
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let serialized = toml::to_string(&Config::default())
                .map_err(|err| SessionError::Config(err.to_string()))?;
            std::fs::write(path, serialized)?;
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_or_default(&content))
    }
}

/// Clamps values into ranges the controller can run with.
pub fn sanitize_config(config: Config) -> Config {
    Config {
        session: SessionConfig {
            progress_interval_ms: config.session.progress_interval_ms.clamp(100, 10_000),
            bus_capacity: config.session.bus_capacity.max(64),
            end_existing_cast_on_load: config.session.end_existing_cast_on_load,
            autoplay_on_load: config.session.autoplay_on_load,
        },
        logging: config.logging,
    }
}

fn default_true() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    800
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::{sanitize_config, Config, SessionConfig};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.session.progress_interval_ms, 800);
        assert_eq!(config.session.bus_capacity, 1024);
        assert!(config.session.end_existing_cast_on_load);
        assert!(config.session.autoplay_on_load);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_partial_config_fills_missing_fields() {
        let partial = r#"
[session]
progress_interval_ms = 250
"#;
        let parsed = Config::from_toml_or_default(partial);

        assert_eq!(parsed.session.progress_interval_ms, 250);
        assert_eq!(parsed.session.bus_capacity, 1024);
        assert!(parsed.session.end_existing_cast_on_load);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_malformed_config_falls_back_to_defaults() {
        let parsed = Config::from_toml_or_default("[session\nprogress_interval_ms = ");
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_sanitize_clamps_out_of_range_values() {
        let config = Config {
            session: SessionConfig {
                progress_interval_ms: 5,
                bus_capacity: 2,
                end_existing_cast_on_load: false,
                autoplay_on_load: true,
            },
            ..Config::default()
        };
        let sanitized = sanitize_config(config);

        assert_eq!(sanitized.session.progress_interval_ms, 100);
        assert_eq!(sanitized.session.bus_capacity, 64);
        assert!(!sanitized.session.end_existing_cast_on_load);
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let parsed = Config::from_toml_or_default("[logging]\nlevel = \"loud\"\n");
        assert_eq!(parsed.logging.level_filter(), log::LevelFilter::Info);

        let parsed = Config::from_toml_or_default("[logging]\nlevel = \"debug\"\n");
        assert_eq!(parsed.logging.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "castlane-config-test-{}",
            std::process::id()
        ));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_file(&path);

        let loaded = Config::load_or_create(&path).expect("config should load");
        assert_eq!(loaded, Config::default());
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
