use cirrus_agents::{AgentConfig, LearningConfig, ReactiveConfig};
use cirrus_llm::{LlmProvider, ModelConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when `[model].api_key` is empty.
pub const API_KEY_ENV: &str = "CIRRUS_API_KEY";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            path: default_memory_path(),
        }
    }
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("./data/experiences.jsonl")
}

fn default_model() -> ModelConfig {
    ModelConfig::new(LlmProvider::Static, "offline")
}

/// Contents of `cirrus.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CirrusConfig {
    #[serde(default = "default_model")]
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub reactive: ReactiveConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl Default for CirrusConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            memory: MemoryConfig::default(),
            learning: LearningConfig::default(),
            reactive: ReactiveConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl CirrusConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: CirrusConfig = toml::from_str(raw)?;
        for agent in &config.agents {
            agent.validate()?;
        }
        config.learning.validate()?;
        Ok(config)
    }

    /// Read `path`, or fall back to defaults when it does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using offline defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )),
        }
    }

    /// Fill an empty API key from `key`, usually [`API_KEY_ENV`].
    pub fn apply_api_key(&mut self, key: Option<String>) {
        if self.model.api_key.is_empty() {
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                self.model.api_key = key;
            }
        }
    }

    /// The configured agent registered as `name`.
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.display_name() == name)
    }
}
