//! CLI configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use questvault::ServiceConfig;
use questvault_narrator::{LlmBackend, OpenAiBackend};
use serde::{Deserialize, Serialize};

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("questvault")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("questvault")
        .join("questvault.toml")
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub narrator: NarratorConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("questvault.db")
}

/// External narrator (OpenAI-compatible endpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarratorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Reject calls that carry no per-user key
    #[serde(default = "default_true")]
    pub require_credential: bool,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            model: default_model(),
            require_credential: true,
        }
    }
}

impl NarratorConfig {
    /// Build the backend, or `None` when disabled.
    pub fn backend(&self) -> anyhow::Result<Option<Arc<dyn LlmBackend>>> {
        if !self.enabled {
            return Ok(None);
        }
        let backend = OpenAiBackend::new(&self.base_url, &self.model, None)
            .context("building narrator backend")?
            .with_required_credential(self.require_credential);
        Ok(Some(Arc::new(backend)))
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

impl VaultConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing config {}", path.display()))
    }
}
