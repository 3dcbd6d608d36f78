//! Layered daemon configuration.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. `<prefix>.toml` (optional, default prefix `lookout`)
//! 3. `LOOKOUT_SCAN__*` / `LOOKOUT_SERVER__*` environment variables

use serde::Deserialize;

use lookout_scan::ScanConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookoutConfig {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the HTTP API.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl LookoutConfig {
    /// Load configuration from `<file_prefix>.<ext>` and the environment.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("LOOKOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scan.scanner_args"),
            )
            .build()?
            .try_deserialize()
    }
}
