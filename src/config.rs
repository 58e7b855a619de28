use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

static CONFIG: OnceLock<Config> = OnceLock::new();

const DEFAULT_PATH: &str = "pacer.toml";

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// Substring used to pick the MIDI port belonging to the device.
    pub port_name: String,
    /// Quiescence window that marks the end of a dump burst.
    pub batch_window_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port_name: "PACER".into(),
            batch_window_ms: 1000,
        }
    }
}

/// Load an explicit config file, or `pacer.toml` from the working
/// directory when present, or the defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            Ok(toml::from_str(&content)?)
        }
        None => match std::fs::read_to_string(DEFAULT_PATH) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => Ok(Config::default()),
        },
    }
}

pub fn init(config: Config) {
    CONFIG.set(config).ok();
}

pub fn port_name() -> &'static str {
    CONFIG
        .get()
        .map(|c| c.port_name.as_str())
        .unwrap_or("PACER")
}

pub fn batch_window() -> Duration {
    Duration::from_millis(CONFIG.get().map(|c| c.batch_window_ms).unwrap_or(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port_name, "PACER");
        assert_eq!(config.batch_window_ms, 1000);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let config: Config = toml::from_str("batch_window_ms = 250").unwrap();
        assert_eq!(config.batch_window_ms, 250);
        assert_eq!(config.port_name, "PACER");
    }
}
