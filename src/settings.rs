//! Runtime settings, layered from an optional `arbor` config file and
//! `ARBOR_`-prefixed environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{ArborError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Path for the durable offline store; in-memory when absent.
    #[serde(default)]
    pub offline_store_path: Option<String>,
    /// Initial connectivity of the service tree.
    #[serde(default = "default_online")]
    pub online: bool,
    /// Log filter directive, e.g. `info` or `arbor=debug`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_online() -> bool {
    true
}

fn default_log_filter() -> String {
    String::from("info")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            offline_store_path: None,
            online: default_online(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("arbor").required(false))
            .add_source(Environment::with_prefix("ARBOR"))
            .build()
            .map_err(|error| ArborError::Config(error.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|error| ArborError::Config(error.to_string()))
    }
}
