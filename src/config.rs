use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::ui::ThinkingView;

pub const DEFAULT_MODEL: &str = "qwen3:latest";
pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MAX_TOKENS: u32 = 16000;
pub const DEFAULT_TEMP: f32 = 0.6;
pub const DEFAULT_SEED: u64 = 0;
pub const DEFAULT_FRAME_MS: u64 = 50;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub default_model: Option<String>,
    pub host: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub seed: Option<u64>,
    pub thinking_view: Option<ThinkingView>,
    /// Redraw interval while streaming, in milliseconds
    pub frame_ms: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        if config.default_model.as_deref() == Some(model) {
            return Ok(());
        }
        config.default_model = Some(model.to_string());
        config.save()
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("thinker-chat").join("config.json"))
    }
}
