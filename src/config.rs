//! Store configuration managed by Figment.

use crate::error::{Error, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the environment variables that override file settings, e.g.
/// `FINGAME_STORE_DATABASE_URL`.
pub const ENV_PREFIX: &str = "FINGAME_STORE_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Database locator.
    /// TOML: `database_url`. Default: `sqlite:///:memory:?threadsafe=true`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Key under which inserts report the assigned rowid.
    /// TOML: `id_key`. Default: `id`.
    #[serde(default = "default_id_key")]
    pub id_key: String,

    /// Whether table creation tolerates existing tables.
    /// TOML: `if_not_exists`. Default: `true`.
    #[serde(default = "default_if_not_exists")]
    pub if_not_exists: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            id_key: default_id_key(),
            if_not_exists: default_if_not_exists(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:///:memory:?threadsafe=true".to_string()
}

fn default_id_key() -> String {
    "id".to_string()
}

fn default_if_not_exists() -> bool {
    true
}

impl StoreConfig {
    /// Defaults, then the TOML file if it exists, then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(StoreConfig::default()));
        if let Some(path) = path.filter(|p| p.is_file()) {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::figment(path)
            .extract()
            .map_err(|err| Error::Config(Box::new(err)))
    }
}
