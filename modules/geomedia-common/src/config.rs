use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::GeomediaError;
use crate::params::{
    HypercubeFilter, MatrixThresholds, NetworkThresholds, NullModelParams, RankingParams,
    SalienceParams,
};
use crate::types::{RoleSelectors, TimeResolution};

/// TOML-backed pipeline configuration. Every section and field is optional;
/// a missing file section falls back to its documented defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub cube: CubeConfig,
    pub filter: HypercubeFilter,
    pub salience: SalienceParams,
    pub ranking: RankingParams,
    pub matrix: MatrixThresholds,
    pub null_model: NullModelParams,
    pub network: NetworkThresholds,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CubeConfig {
    pub resolution: TimeResolution,
    pub roles: RoleSelectors,
    /// Restrict the topic indicator to one topic value instead of "any topic".
    pub sub_topic: Option<String>,
}

impl FileConfig {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        if let Some(sub) = &self.cube.sub_topic {
            if sub.trim().is_empty() {
                return Err(GeomediaError::Config(
                    "cube.sub_topic must not be blank".to_string(),
                ));
            }
        }
        self.filter.validate()?;
        self.salience.validate()?;
        self.ranking.validate()?;
        self.matrix.validate()?;
        self.null_model.validate()?;
        self.network.validate()
    }
}

/// Parse a TOML config string and validate it.
pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content).context("Failed to parse config TOML")?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Process-level settings taken from the environment (and `.env`).
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let log_format = match std::env::var("GEOMEDIA_LOG_FORMAT")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            config_path: std::env::var("GEOMEDIA_CONFIG").ok().map(PathBuf::from),
            log_format,
        }
    }

    pub fn log_settings(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  GEOMEDIA_CONFIG: {}",
            self.config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  GEOMEDIA_LOG_FORMAT: {:?}", self.log_format);
    }
}
