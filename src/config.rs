//! Runtime settings, layered from built-in defaults, an optional
//! `otuscope.toml` next to the binary and `OTUSCOPE_*` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{OtuscopeError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path of the SQLite database file.
    pub database: String,
    /// Rows fetched per keyset page.
    pub page_size: usize,
    /// Center of the longitude rewrap window used by spatial exports.
    pub longitude_center: f64,
    /// Chunks buffered between an export worker and its consumer.
    pub channel_depth: usize,
    /// TTL of the short-lived cache class, in seconds.
    pub default_cache_ttl_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let build = || -> std::result::Result<Settings, config::ConfigError> {
            Config::builder()
                .set_default("database", "otuscope.db")?
                .set_default("page_size", 200)?
                .set_default("longitude_center", 150.0)?
                .set_default("channel_depth", 64)?
                .set_default("default_cache_ttl_secs", 3600)?
                .add_source(File::with_name("otuscope").required(false))
                .add_source(Environment::with_prefix("OTUSCOPE"))
                .build()?
                .try_deserialize()
        };
        build().map_err(|e| OtuscopeError::Config(e.to_string()))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: "otuscope.db".to_string(),
            page_size: 200,
            longitude_center: 150.0,
            channel_depth: 64,
            default_cache_ttl_secs: 3600,
        }
    }
}
