//! Layered settings for the `trellis` binary.
//!
//! `trellis.toml` (optional) with a `[neo4j]` and a `[trellis]` section,
//! overridden by `TRELLIS__<SECTION>__<KEY>` environment variables, e.g.
//! `TRELLIS__NEO4J__URI=bolt://graph:7687`.

use serde::Deserialize;

use trellis_core::config::TrellisConfig;
use trellis_graph::GraphConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub neo4j: GraphConfig,
    pub trellis: TrellisConfig,
}

impl Settings {
    /// Load from `<file_prefix>.toml` (or any format `config` recognizes) and
    /// the environment. A missing file is not an error.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::config::Backend;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let settings = Settings::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(settings.trellis.backend, Backend::Memory);
        assert_eq!(settings.neo4j.uri, "bolt://localhost:7687");
    }

    #[test]
    fn file_sections_are_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("trellis.toml"),
            r#"
            [neo4j]
            uri = "bolt://graph.internal:7687"
            password = "s3cret"

            [trellis]
            backend = "neo4j"
            schema_version = "1.1.0"
            token_expiry_minutes = 45
            "#,
        )
        .unwrap();

        let prefix = dir.path().join("trellis");
        let settings = Settings::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(settings.neo4j.uri, "bolt://graph.internal:7687");
        assert_eq!(settings.neo4j.password, "s3cret");
        assert_eq!(settings.neo4j.user, "neo4j");
        assert_eq!(settings.trellis.backend, Backend::Neo4j);
        assert_eq!(settings.trellis.schema_version, "1.1.0");
        assert_eq!(settings.trellis.token_expiry_minutes, 45);
        assert_eq!(settings.trellis.default_page_size, 10);
    }
}
