//! Runtime settings, layered from built-in defaults, an optional TOML file and
//! `IMAGEBLEND_*` environment variables.

use crate::config::*;
use crate::pipeline::StageTimeouts;
use crate::services::gemini::GeminiOptions;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for GeminiSettings {
    fn default() -> Self {
        GeminiSettings {
            api_key: None,
            base_url: GEMINI_BASE_URL.to_string(),
            text_model: GEMINI_TEXT_MODEL.to_string(),
            image_model: GEMINI_IMAGE_MODEL.to_string(),
            timeout_secs: GEMINI_TIMEOUT_SECS,
        }
    }
}

impl GeminiSettings {
    /// Client options; fails when no API key was configured anywhere
    pub fn options(&self) -> Result<GeminiOptions> {
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("no API key configured: set IMAGEBLEND_GEMINI__API_KEY or API_KEY")?;

        Ok(GeminiOptions {
            api_key,
            base_url: self.base_url.clone(),
            text_model: self.text_model.clone(),
            image_model: self.image_model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub describe_timeout_secs: u64,
    pub generate_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            describe_timeout_secs: DEFAULT_DESCRIBE_TIMEOUT_SECS,
            generate_timeout_secs: DEFAULT_GENERATE_TIMEOUT_SECS,
        }
    }
}

impl PipelineSettings {
    pub fn timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            describe: Duration::from_secs(self.describe_timeout_secs),
            generate: Duration::from_secs(self.generate_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    pub backend_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: DEFAULT_GENERATE_TIMEOUT_SECS,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub gemini: GeminiSettings,
    pub pipeline: PipelineSettings,
    pub client: ClientSettings,
}

impl Settings {
    /// Load settings. With `path`, that file must exist; without it,
    /// `imageblend.toml` in the working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        if settings.gemini.api_key.is_none() {
            settings.gemini.api_key = ["API_KEY", "GEMINI_API_KEY"]
                .iter()
                .find_map(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty());
        }

        Ok(settings)
    }
}
