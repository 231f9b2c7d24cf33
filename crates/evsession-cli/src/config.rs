//! CLI configuration loaded from TOML.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Value of `emitter.output` that asks for a freshly opened `/dev/uinput`.
pub const KERNEL_MANAGED: &str = "kernel-managed";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            session: SessionConfig::default(),
            emitter: EmitterConfig::default(),
        }
    }
}

/// How device sessions are opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Grab the device right after binding.
    #[serde(default)]
    pub grab: bool,
}

/// Virtual device settings for `mirror`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    #[serde(default = "default_emitter_name")]
    pub name: String,
    /// `"kernel-managed"`, or the path of a uinput node to open ourselves.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            name: default_emitter_name(),
            output: default_output(),
        }
    }
}

impl EmitterConfig {
    /// The uinput node to open, or `None` to let the library open one.
    pub fn output_path(&self) -> Option<&Path> {
        if self.output == KERNEL_MANAGED {
            None
        } else {
            Some(Path::new(&self.output))
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_emitter_name() -> String {
    "evsession virtual device".to_string()
}

fn default_output() -> String {
    KERNEL_MANAGED.to_string()
}

/// Get the config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("evsession")
}

/// Load configuration from `path`, or from the default location. A missing
/// file yields the defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => config_dir().join("config.toml"),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config {}", config_path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", config_path.display()))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml_str.contains("log_level = \"info\""));
        assert!(toml_str.contains("grab = false"));
        assert!(!toml_str.contains("poll_interval_ms"));
        assert!(toml_str.contains("output = \"kernel-managed\""));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
log_level = "debug"

[session]
grab = true

[emitter]
name = "clone"
output = "/dev/uinput"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.session.grab);
        assert_eq!(config.emitter.name, "clone");
        assert_eq!(config.emitter.output_path(), Some(Path::new("/dev/uinput")));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.session.grab);
        assert_eq!(config.emitter.output_path(), None);
    }

    #[test]
    fn partial_section_fills_in_defaults() {
        let config: Config = toml::from_str("[emitter]\nname = \"clone\"\n").unwrap();
        assert_eq!(config.emitter.name, "clone");
        assert_eq!(config.emitter.output, KERNEL_MANAGED);
    }

    #[test]
    fn retired_polling_keys_are_ignored() {
        let toml_str = "[session]\ngrab = true\nnonblocking = false\npoll_interval_ms = 20\n";
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.session.grab);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Some("/nonexistent/evsession/config.toml")).unwrap();
        assert_eq!(config.emitter.name, "evsession virtual device");
    }
}
