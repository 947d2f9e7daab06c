//! Settings loaded from `~/.eidcard/eidcard.toml` and `EIDCARD_*` variables

use std::path::PathBuf;
use std::time::Duration;

use eidcard_transport_pcsc::PcscConfig;
use eyre::OptionExt;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Keys that may come from the environment. Secrets share the `EIDCARD_`
/// prefix and must never end up in here.
const ENV_KEYS: [&str; 5] = [
    "reader",
    "transmit_timeout_secs",
    "discovery_timeout_secs",
    "poll_interval_ms",
    "log_level",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct Config {
    /// Preferred reader, matched as a substring of the reader name
    pub(crate) reader: Option<String>,
    pub(crate) transmit_timeout_secs: u64,
    /// How long to wait for a document to be presented
    pub(crate) discovery_timeout_secs: u64,
    pub(crate) poll_interval_ms: u64,
    pub(crate) log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader: None,
            transmit_timeout_secs: 50,
            discovery_timeout_secs: 60,
            poll_interval_ms: 250,
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    pub(crate) const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub(crate) const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn pcsc(&self) -> PcscConfig {
        PcscConfig::new()
            .with_transmit_timeout(Duration::from_secs(self.transmit_timeout_secs))
            .with_poll_interval(self.poll_interval())
    }

    /// Parsed `log_level`, falling back to INFO for unknown names
    pub(crate) fn level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Returns the base config directory for eidcard
pub(crate) fn config_dir() -> eyre::Result<PathBuf> {
    Ok(std::env::home_dir()
        .ok_or_eyre("home directory not found")?
        .join(".eidcard"))
}

pub(crate) fn load_config() -> eyre::Result<Config> {
    Ok(figment(config_dir()?.join("eidcard.toml")).extract()?)
}

fn figment(path: PathBuf) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("EIDCARD_").only(&ENV_KEYS))
}
