use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::EngineResult;

pub const DEFAULT_MAX_GENERATION_STEPS: usize = 128;
pub const DEFAULT_UNLOAD_DELAY_MS: u64 = 10 * 60 * 1000;

fn default_max_generation_steps() -> usize {
    DEFAULT_MAX_GENERATION_STEPS
}

fn default_unload_delay_ms() -> u64 {
    DEFAULT_UNLOAD_DELAY_MS
}

fn default_system_prompt() -> String {
    "grammar: ".to_string()
}

fn default_target_language() -> String {
    "Spanish".to_string()
}

/// Caller-owned engine settings. The three file references plus the tunables
/// are the only state persisted outside the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Encoder graph file. Required before any inference call.
    pub encoder_path: Option<String>,
    /// Decoder graph file. Without it the engine returns input unchanged.
    pub decoder_path: Option<String>,
    /// Vocabulary description (tokenizer.json or token\tid TSV).
    pub tokenizer_path: Option<String>,
    #[serde(default = "default_max_generation_steps")]
    pub max_generation_steps: usize,
    /// Suppresses the idle-unload timer entirely.
    #[serde(default)]
    pub keep_model_loaded: bool,
    /// Instruction prefix prepended to proofread inputs.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Private staging directory for model artifacts; temp dir when unset.
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_unload_delay_ms")]
    pub unload_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encoder_path: None,
            decoder_path: None,
            tokenizer_path: None,
            max_generation_steps: DEFAULT_MAX_GENERATION_STEPS,
            keep_model_loaded: false,
            system_prompt: default_system_prompt(),
            target_language: default_target_language(),
            cache_dir: None,
            unload_delay_ms: DEFAULT_UNLOAD_DELAY_MS,
        }
    }
}

impl EngineConfig {
    /// Resolved staging directory for copied model artifacts.
    pub fn staging_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("proofread_onnx"),
        }
    }
}

#[async_trait]
pub trait ConfigManager: Send + Sync {
    async fn current(&self) -> EngineResult<EngineConfig>;
}

/// In-memory config holder, enough for embedders that push settings in.
pub struct StaticConfigManager {
    config: RwLock<EngineConfig>,
}

impl StaticConfigManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub async fn replace(&self, config: EngineConfig) {
        *self.config.write().await = config;
    }
}

#[async_trait]
impl ConfigManager for StaticConfigManager {
    async fn current(&self) -> EngineResult<EngineConfig> {
        Ok(self.config.read().await.clone())
    }
}
