//! Configuration: host-provided model settings and engine tunables.
//!
//! Model settings are read through the [`ConfigSource`] trait, one
//! [`ConfigKey`] at a time, and validated into a typed [`Settings`] record
//! at the start of every turn. That way a host that edits its preferences
//! between questions is picked up on the next call, and the client
//! registries see a changed [`ClientConfig`] and rebuild.
//!
//! Two sources ship with the crate:
//!
//! - [`MapConfigSource`]: an in-memory, mutable map for embedding hosts
//!   and tests.
//! - [`FileConfig`]: a TOML file used by the `pchat` CLI:
//!
//! ```toml
//! [llm]
//! base_url = "http://localhost:11434/v1"
//! model = "llama3.1"
//! temperature = 0.0
//!
//! [embedding]
//! base_url = "http://localhost:11434/v1"
//! model = "nomic-embed-text"
//!
//! [rag]
//! chunk_size = 1000
//! chunk_overlap = 200
//! top_k = 5
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::RagError;

/// The closed set of keys the engine reads from its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    LlmBaseUrl,
    LlmModelName,
    LlmApiKey,
    LlmTemperature,
    EmbeddingBaseUrl,
    EmbeddingModelName,
    EmbeddingApiKey,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::LlmBaseUrl,
        ConfigKey::LlmModelName,
        ConfigKey::LlmApiKey,
        ConfigKey::LlmTemperature,
        ConfigKey::EmbeddingBaseUrl,
        ConfigKey::EmbeddingModelName,
        ConfigKey::EmbeddingApiKey,
    ];

    /// Preference name as hosts store it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::LlmBaseUrl => "llmBaseUrl",
            ConfigKey::LlmModelName => "llmModelName",
            ConfigKey::LlmApiKey => "llmApiKey",
            ConfigKey::LlmTemperature => "llmTemperature",
            ConfigKey::EmbeddingBaseUrl => "embeddingBaseUrl",
            ConfigKey::EmbeddingModelName => "embeddingModelName",
            ConfigKey::EmbeddingApiKey => "embeddingApiKey",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw preference value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Text(String),
    Number(f64),
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Text(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::Text(s)
    }
}

impl From<f64> for ConfigValue {
    fn from(n: f64) -> Self {
        ConfigValue::Number(n)
    }
}

/// Host capability for reading preferences.
pub trait ConfigSource: Send + Sync {
    /// Current value for `key`, or `None` when unset.
    fn get(&self, key: ConfigKey) -> Option<ConfigValue>;
}

/// Mutable in-memory [`ConfigSource`].
#[derive(Debug, Default)]
pub struct MapConfigSource {
    values: RwLock<HashMap<ConfigKey, ConfigValue>>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(self, key: ConfigKey, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: ConfigKey, value: impl Into<ConfigValue>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key, value.into());
    }

    pub fn remove(&self, key: ConfigKey) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(&key);
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: ConfigKey) -> Option<ConfigValue> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(&key).cloned()
    }
}

/// Connection settings for one model client.
///
/// Two configs are equal iff every field matches; the client registries
/// use this equality to decide whether a cached client is still valid.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub model_name: String,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_name: model_name.into(),
            api_key: None,
            temperature: None,
        }
    }

    /// Join `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// API key to send as a bearer token, if one is set and non-empty.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Validated model settings for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub llm: ClientConfig,
    pub embedding: ClientConfig,
}

impl Settings {
    /// Read and validate every model setting from `source`.
    ///
    /// All missing required keys are reported together.
    pub fn load(source: &dyn ConfigSource) -> Result<Self, RagError> {
        let mut missing = Vec::new();
        let mut require = |key: ConfigKey| {
            let value = text(source, key);
            if value.is_none() {
                missing.push(key.as_str());
            }
            value.unwrap_or_default()
        };

        let llm_base_url = require(ConfigKey::LlmBaseUrl);
        let llm_model = require(ConfigKey::LlmModelName);
        let embedding_base_url = require(ConfigKey::EmbeddingBaseUrl);
        let embedding_model = require(ConfigKey::EmbeddingModelName);

        if !missing.is_empty() {
            return Err(RagError::ConfigIncomplete(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            llm: ClientConfig {
                base_url: llm_base_url,
                model_name: llm_model,
                api_key: text(source, ConfigKey::LlmApiKey),
                temperature: temperature(source)?,
            },
            embedding: ClientConfig {
                base_url: embedding_base_url,
                model_name: embedding_model,
                api_key: text(source, ConfigKey::EmbeddingApiKey),
                temperature: None,
            },
        })
    }
}

/// Trimmed, non-empty text value for `key`.
fn text(source: &dyn ConfigSource, key: ConfigKey) -> Option<String> {
    let value = match source.get(key)? {
        ConfigValue::Text(s) => s.trim().to_string(),
        ConfigValue::Number(n) => n.to_string(),
    };
    (!value.is_empty()).then_some(value)
}

fn temperature(source: &dyn ConfigSource) -> Result<Option<f64>, RagError> {
    let key = ConfigKey::LlmTemperature;
    let value = match source.get(key) {
        None => return Ok(None),
        Some(ConfigValue::Number(n)) => n,
        Some(ConfigValue::Text(s)) if s.trim().is_empty() => return Ok(None),
        Some(ConfigValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
            RagError::ConfigIncomplete(format!("{} must be a number, got '{}'", key, s))
        })?,
    };
    if !(0.0..=2.0).contains(&value) {
        return Err(RagError::ConfigIncomplete(format!(
            "{} must be within 0..=2, got {}",
            key, value
        )));
    }
    Ok(Some(value))
}

// ============ Engine tunables ============

/// Retrieval and transport tunables (the `[rag]` table).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RagOptions {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            chat_timeout_secs: default_chat_timeout_secs(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            embedding_batch_size: default_embedding_batch_size(),
            embedding_concurrency: default_embedding_concurrency(),
            max_retries: 0,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_top_k() -> usize {
    5
}
fn default_chat_timeout_secs() -> u64 {
    60
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_embedding_concurrency() -> usize {
    4
}

/// Upper bound on parallel per-text embedding requests. Local inference
/// servers tend to queue or fail beyond this.
pub const MAX_EMBEDDING_CONCURRENCY: usize = 4;

impl RagOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("rag.chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!("rag.chunk_overlap must be smaller than rag.chunk_size");
        }
        if self.top_k == 0 {
            anyhow::bail!("rag.top_k must be >= 1");
        }
        if self.embedding_batch_size == 0 {
            anyhow::bail!("rag.embedding_batch_size must be >= 1");
        }
        if !(1..=MAX_EMBEDDING_CONCURRENCY).contains(&self.embedding_concurrency) {
            anyhow::bail!(
                "rag.embedding_concurrency must be within 1..={}",
                MAX_EMBEDDING_CONCURRENCY
            );
        }
        if self.chat_timeout_secs == 0 || self.embedding_timeout_secs == 0 {
            anyhow::bail!("rag timeouts must be > 0 seconds");
        }
        Ok(())
    }
}

// ============ TOML file ============

/// One `[llm]` or `[embedding]` table.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Contents of a `pchat` TOML configuration file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub llm: ModelSection,
    #[serde(default)]
    pub embedding: ModelSection,
    #[serde(default)]
    pub rag: RagOptions,
}

/// Environment variable consulted when a section has no `api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

impl ConfigSource for FileConfig {
    fn get(&self, key: ConfigKey) -> Option<ConfigValue> {
        let text = |v: &Option<String>| v.clone().map(ConfigValue::Text);
        let api_key = |v: &Option<String>| {
            v.clone()
                .or_else(|| std::env::var(API_KEY_ENV).ok())
                .map(ConfigValue::Text)
        };
        match key {
            ConfigKey::LlmBaseUrl => text(&self.llm.base_url),
            ConfigKey::LlmModelName => text(&self.llm.model),
            ConfigKey::LlmApiKey => api_key(&self.llm.api_key),
            ConfigKey::LlmTemperature => self.llm.temperature.map(ConfigValue::Number),
            ConfigKey::EmbeddingBaseUrl => text(&self.embedding.base_url),
            ConfigKey::EmbeddingModelName => text(&self.embedding.model),
            ConfigKey::EmbeddingApiKey => api_key(&self.embedding.api_key),
        }
    }
}

/// Read and validate a TOML configuration file.
///
/// Missing model keys are not an error here; they surface as
/// [`RagError::ConfigIncomplete`] when a question is asked, so commands
/// that never talk to a model still work with a partial file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: FileConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.rag.validate()?;

    Ok(config)
}
