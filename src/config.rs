//! Wallet configuration.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Tunables recognized by the wallet engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Minimum depth below the head before a mined transaction or note
    /// counts as confirmed.
    pub confirmations: u64,
    /// How many blocks a pending transaction waits after its last submission
    /// before it is rebroadcast.
    pub rebroadcast_after: u64,
    /// Notes per batch handed to the decryption worker pool.
    pub decrypt_batch_size: usize,
    /// Milliseconds between event-loop iterations.
    pub event_loop_interval_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            confirmations: 2,
            rebroadcast_after: 10,
            decrypt_batch_size: 20,
            event_loop_interval_ms: 1000,
        }
    }
}

/// Loads configuration from an optional TOML file with `NIGHTFALL_`-prefixed
/// environment overrides on top of the built-in defaults.
pub fn load_configuration(path: Option<&Path>) -> Result<WalletConfig> {
    let mut builder = Config::builder().add_source(
        Config::try_from(&WalletConfig::default()).context("Could not build default config")?,
    );

    if let Some(path) = path {
        let filename = path.to_str().context("Invalid config file path")?;
        builder = builder.add_source(File::with_name(filename).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("NIGHTFALL")
            .prefix_separator("_")
            .separator("__"),
    );

    builder
        .build()
        .context("Could not build config")?
        .try_deserialize()
        .context("Invalid configuration values")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = WalletConfig::default();
        assert_eq!(config.confirmations, 2);
        assert_eq!(config.rebroadcast_after, 10);
        assert_eq!(config.decrypt_batch_size, 20);
        assert_eq!(config.event_loop_interval_ms, 1000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_configuration(Some(Path::new("/nonexistent/wallet.toml"))).unwrap();
        assert_eq!(config, WalletConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "confirmations = 6\nrebroadcast_after = 3").unwrap();

        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.confirmations, 6);
        assert_eq!(config.rebroadcast_after, 3);
        assert_eq!(config.decrypt_batch_size, 20);
    }
}
