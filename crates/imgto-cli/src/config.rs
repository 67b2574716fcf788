//! Application configuration
//!
//! Layered in order: TOML file, `CLOUDINARY_*` environment, command line.

use anyhow::Context;
use imgto_core::config::PipelineConfig;
use imgto_media::MediaConfig;
use imgto_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the binary can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) pipeline: PipelineConfig,
    pub(crate) media: MediaConfig,
    pub(crate) server: ServerConfig,
}

impl AppConfig {
    /// Parse TOML text
    pub(crate) fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid config file")?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Load `path` if given, then overlay the environment
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("unable to read {}", path.display()))?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.media = config.media.with_env();
        Ok(config)
    }
}
