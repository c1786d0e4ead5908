//! Mapper configuration.
//!
//! Loaded from the `[trellis]` section of `trellis.toml` or
//! `TRELLIS__TRELLIS__*` environment variables. Every key has a default.

use serde::Deserialize;

use crate::search::DEFAULT_LIMIT;

/// Which graph store backs the mapper.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded in-process graph, lost on exit.
    #[default]
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Schema version the patch scheduler migrates to by default.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Sliding expiry window for access tokens.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_minutes: i64,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// bcrypt work factor for stored credentials.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_schema_version() -> String {
    "0.0.0".to_string()
}

fn default_token_expiry() -> i64 {
    30
}

fn default_page_size() -> usize {
    DEFAULT_LIMIT
}

fn default_bcrypt_cost() -> u32 {
    10
}

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            schema_version: default_schema_version(),
            token_expiry_minutes: default_token_expiry(),
            default_page_size: default_page_size(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> TrellisConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = TrellisConfig::default();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.token_expiry_minutes, 30);
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = from_toml(
            r#"
            backend = "neo4j"
            schema_version = "1.2.0"
            "#,
        );
        assert_eq!(config.backend, Backend::Neo4j);
        assert_eq!(config.schema_version, "1.2.0");
        assert_eq!(config.token_expiry_minutes, 30);
        assert_eq!(config.bcrypt_cost, 10);
    }
}
