pub mod index;
pub mod ingest;

use docsim_error::{DocsimError, DocsimValidationError, ErrorCodes};
use docsim_tracing::LogFilter;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

pub use index::IndexConfig;
pub use ingest::IngestConfig;

pub const DEFAULT_CONFIG_PATH: &str = "./docsim_config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
    #[error("Invalid config: {0}")]
    Validation(#[from] DocsimValidationError),
}

impl DocsimError for ConfigError {
    fn code(&self) -> ErrorCodes {
        match self {
            ConfigError::Load(_) => ErrorCodes::InvalidArgument,
            ConfigError::Validation(e) => e.code(),
        }
    }
}

pub fn default_service_name() -> String {
    "docsim".to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RootConfig {
    #[serde(default)]
    #[validate(nested)]
    pub docsim: DocsimConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_embedding_dimension"))]
pub struct DocsimConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    #[validate(nested)]
    pub index: IndexConfig,
    #[serde(default)]
    #[validate(nested)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub filters: Vec<LogFilter>,
}

impl Default for DocsimConfig {
    fn default() -> Self {
        DocsimConfig {
            service_name: default_service_name(),
            index: IndexConfig::default(),
            ingest: IngestConfig::default(),
            filters: Vec::new(),
        }
    }
}

fn validate_embedding_dimension(config: &DocsimConfig) -> Result<(), ValidationError> {
    match config.ingest.embedding_dimension {
        Some(dimension) if dimension != config.index.dimensionality => {
            Err(ValidationError::new("embedding_dimension").with_message(
                format!(
                    "embedding dimension {} differs from index dimensionality {}",
                    dimension, config.index.dimensionality
                )
                .into(),
            ))
        }
        _ => Ok(()),
    }
}

impl DocsimConfig {
    pub fn embedding_dimension(&self) -> usize {
        self.ingest
            .embedding_dimension
            .unwrap_or(self.index.dimensionality)
    }
}

impl RootConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Reads `path` if it exists, then applies `DOCSIM_` environment
    /// variables on top. A missing file is not an error.
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        // Figment splits nested keys on `.`, which environment variable names
        // cannot contain, so `__` stands in for it.
        let mut f = figment::Figment::from(
            Env::prefixed("DOCSIM_").map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        let config: RootConfig = f.extract()?;
        config.validate().map_err(DocsimValidationError::from)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsim_ingest::TextEncoding;
    use docsim_tracing::LogFilterLevel;
    use figment::Jail;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        Jail::expect_with(|_| {
            let config = RootConfig::load().unwrap();
            assert_eq!(config, RootConfig::default());
            assert_eq!(config.docsim.service_name, "docsim");
            assert_eq!(config.docsim.index.nprobe, 8);
            assert_eq!(config.docsim.index.k, 5);
            assert_eq!(config.docsim.ingest.page_size, 10);
            assert_eq!(config.docsim.embedding_dimension(), 128);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_load_from_default_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "docsim_config.yaml",
                r#"
                docsim:
                    service_name: "docsim-test"
                    index:
                        dimensionality: 64
                        nlist: 16
                        m: 8
                        nbits: 6
                        nprobe: 4
                        k: 10
                        seed: 42
                        training_sample_size: 5000
                    ingest:
                        field: "_values.body"
                        encoding: "utf-8"
                        page_size: 100
                    filters:
                        - crate_name: "docsim_index"
                          filter_level: "debug"
                "#,
            )?;
            let config = RootConfig::load().unwrap();
            let docsim = &config.docsim;
            assert_eq!(docsim.service_name, "docsim-test");
            assert_eq!(docsim.index.dimensionality, 64);
            assert_eq!(docsim.index.nlist, Some(16));
            assert_eq!(docsim.index.m, 8);
            assert_eq!(docsim.index.nbits, 6);
            assert_eq!(docsim.index.nprobe, 4);
            assert_eq!(docsim.index.k, 10);
            assert_eq!(docsim.index.seed, 42);
            assert_eq!(docsim.index.training_sample_size, Some(5000));
            assert_eq!(docsim.index.max_iterations, 25);
            assert_eq!(docsim.ingest.field, "_values.body");
            assert_eq!(docsim.ingest.encoding, TextEncoding::Utf8);
            assert_eq!(docsim.ingest.page_size, 100);
            assert_eq!(docsim.filters.len(), 1);
            assert_eq!(docsim.filters[0].filter_level, LogFilterLevel::Debug);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.yaml",
                r#"
                docsim:
                    index:
                        nprobe: 4
                        nlist: 16
                "#,
            )?;
            jail.set_env("DOCSIM_DOCSIM__INDEX__NPROBE", 12);
            jail.set_env("DOCSIM_DOCSIM__INGEST__PAGE_SIZE", 50);
            let config = RootConfig::load_from_path("custom.yaml").unwrap();
            assert_eq!(config.docsim.index.nprobe, 12);
            assert_eq!(config.docsim.index.nlist, Some(16));
            assert_eq!(config.docsim.ingest.page_size, 50);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "docsim_config.yaml",
                r#"
                docsim:
                    index:
                        nbits: 12
                "#,
            )?;
            assert!(matches!(
                RootConfig::load(),
                Err(ConfigError::Validation(_))
            ));

            jail.create_file(
                "docsim_config.yaml",
                r#"
                docsim:
                    index:
                        dimensionality: 64
                    ingest:
                        embedding_dimension: 32
                "#,
            )?;
            assert!(matches!(
                RootConfig::load(),
                Err(ConfigError::Validation(_))
            ));

            jail.create_file(
                "docsim_config.yaml",
                r#"
                docsim:
                    index:
                        nprobe: "many"
                "#,
            )?;
            let err = RootConfig::load().unwrap_err();
            assert!(matches!(err, ConfigError::Load(_)));
            assert_eq!(err.code(), ErrorCodes::InvalidArgument);
            Ok(())
        });
    }
}
