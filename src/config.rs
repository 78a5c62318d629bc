use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::Result;
use crate::mapping::AutoMapping;

/// Mapper settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Active database variant; statements declaring it win over variant-free ones.
    pub database_id: Option<String>,
    pub use_actual_param_name: bool,
    pub use_generated_keys: bool,
    /// Seconds.
    pub default_statement_timeout: Option<u32>,
    pub default_fetch_size: Option<u32>,
    pub map_underscore_to_camel_case: bool,
    pub auto_mapping: AutoMapping,
    pub lazy_loading_enabled: bool,
    /// Mapping units loaded at startup.
    pub mapper_locations: Vec<PathBuf>,
    /// SQLite database file; in-memory when unset.
    pub database: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_id: None,
            use_actual_param_name: true,
            use_generated_keys: false,
            default_statement_timeout: None,
            default_fetch_size: None,
            map_underscore_to_camel_case: false,
            auto_mapping: AutoMapping::Partial,
            lazy_loading_enabled: false,
            mapper_locations: Vec::new(),
            database: None,
        }
    }
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut paths = vec![PathBuf::from("./sqlmapper.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sqlmapper").join("sqlmapper.toml"));
    }
    paths
}

impl Settings {
    /// Load settings with priority: ENV > config file > defaults.
    ///
    /// CLI flags are applied on top by the caller.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // 1. First config file found (an explicit path must exist)
        for path in config_paths(explicit) {
            if explicit.is_some() || path.exists() {
                tracing::debug!(path = %path.display(), "loading settings file");
                builder = builder.add_source(File::from(path.as_path()));
                break;
            }
        }

        // 2. Environment (SQLMAPPER_*)
        builder = builder.add_source(
            Environment::with_prefix("SQLMAPPER")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("mapper_locations"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
