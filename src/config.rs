//! Runtime configuration.
//!
//! Load order (later wins):
//! 1. Compiled defaults
//! 2. `<user config dir>/kilobeat/config.toml`, or an explicit path
//! 3. Environment variables (`KILOBEAT_SERVER`, `KILOBEAT_SAMPLE_RATE`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Everything a session or hub reads at startup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilobeatConfig {
    pub audio: AudioConfig,
    pub sync: SyncConfig,
    pub network: NetworkConfig,
    pub display: DisplayConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Volume slider position in `[0, 1]`.
    pub master_volume: f64,
    /// Samples kept per participant for scopes and meters.
    pub tap_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            master_volume: 0.5,
            tap_capacity: 8192,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the outbound editor/pose loop.
    pub interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            connect_timeout_ms: 5000,
        }
    }
}

impl SyncConfig {
    /// Outbound sync period, never shorter than a millisecond.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hub address clients dial.
    pub server: String,
    /// Address the hub listens on.
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8765".to_string(),
            bind: "0.0.0.0:8765".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub error_flash_ms: u64,
    pub run_flash_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            error_flash_ms: 200,
            run_flash_ms: 100,
        }
    }
}

/// Where the loaded values came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

impl KilobeatConfig {
    /// Load from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `config_path` if given, else the user config file, then apply env overrides.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = KilobeatConfig::default();

        if let Some(path) = discover_config_file(config_path) {
            config = load_from_file(&path)?;
            sources.files.push(path);
        }

        apply_env_overrides(&mut config, &mut sources);
        debug!(?sources, "configuration loaded");
        Ok((config, sources))
    }

    /// The first value no session could run with, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.audio.sample_rate == 0 {
            return Err("audio.sample_rate must be positive".to_string());
        }
        if self.sync.interval_ms == 0 {
            return Err("sync.interval_ms must be positive".to_string());
        }
        Ok(())
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// `<user config dir>/kilobeat/config.toml`, whether or not it exists.
pub fn user_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("kilobeat").join("config.toml"))
}

fn discover_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    user_config_path().filter(|path| path.exists())
}

/// Parse one TOML file. Missing keys keep their defaults.
pub fn load_from_file(path: &Path) -> Result<KilobeatConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let config: KilobeatConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    config.validate().map_err(|message| ConfigError::Invalid {
        path: path.to_path_buf(),
        message,
    })?;
    Ok(config)
}

/// Apply `KILOBEAT_*` environment variables.
pub fn apply_env_overrides(config: &mut KilobeatConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| std::env::var(key).ok());
}

fn apply_overrides_with(
    config: &mut KilobeatConfig,
    sources: &mut ConfigSources,
    var: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = var("KILOBEAT_SERVER") {
        config.network.server = v;
        sources.env_overrides.push("KILOBEAT_SERVER".to_string());
    }
    if let Some(v) = var("KILOBEAT_SAMPLE_RATE") {
        // Unparseable values are ignored rather than failing the whole load.
        if let Ok(rate) = v.parse() {
            config.audio.sample_rate = rate;
            sources.env_overrides.push("KILOBEAT_SAMPLE_RATE".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nsample_rate = 44100\n\n[network]\nserver = \"hub:9000\"").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.master_volume, 0.5);
        assert_eq!(config.network.server, "hub:9000");
        assert_eq!(config.network.bind, "0.0.0.0:8765");
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn explicit_path_is_recorded_as_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\ninterval_ms = 50").unwrap();

        let (config, sources) = KilobeatConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.sync.interval(), Duration::from_millis(50));
        assert_eq!(sources.files, vec![file.path().to_path_buf()]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn zero_sync_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\ninterval_ms = 0").unwrap();
        let err = load_from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { ref message, .. } if message.contains("interval_ms")
        ));

        // Built in code, the period is still clamped.
        let sync = SyncConfig {
            interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(sync.interval(), Duration::from_millis(1));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nsample_rate = \"fast\"").unwrap();
        let err = load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_win_and_are_tracked() {
        let mut config = KilobeatConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(&mut config, &mut sources, |key| match key {
            "KILOBEAT_SERVER" => Some("10.0.0.2:8765".to_string()),
            "KILOBEAT_SAMPLE_RATE" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.network.server, "10.0.0.2:8765");
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(sources.env_overrides, vec!["KILOBEAT_SERVER".to_string()]);
    }

    #[test]
    fn toml_round_trips() {
        let config = KilobeatConfig::default();
        let text = config.to_toml().unwrap();
        let back: KilobeatConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
