//! User settings and the key-value store they persist in.
//!
//! Settings are read fresh on every request and turned into a
//! [`ProviderConfig`] snapshot; nothing holds on to them between calls.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::{KratkoError, Result},
    provider::{Provider, ProviderConfig},
    recognition::{DEFAULT_TRANSCRIPTION_ENDPOINT, DEFAULT_TRANSCRIPTION_MODEL},
    types::RecognitionBackend,
};

/// Store key the settings live under.
pub const CONFIG_KEY: &str = "config";
pub const MASKED_API_KEY: &str = "******";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_provider: String,
    pub api_key: String,
    pub api_endpoint: String,
    pub model: String,
    pub speech_recognition_provider: RecognitionBackend,
    pub whisper_endpoint: String,
    pub whisper_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        let provider = Provider::default();
        Self {
            api_provider: provider.id().to_string(),
            api_key: String::new(),
            api_endpoint: provider.config().endpoint.to_string(),
            model: "gpt-4o-mini".to_string(),
            speech_recognition_provider: RecognitionBackend::Streaming,
            whisper_endpoint: DEFAULT_TRANSCRIPTION_ENDPOINT.to_string(),
            whisper_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_recognition_provider: Option<RecognitionBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper_model: Option<String>,
}

impl Settings {
    pub fn merge(&mut self, patch: SettingsPatch) {
        let SettingsPatch {
            api_provider,
            api_key,
            api_endpoint,
            model,
            speech_recognition_provider,
            whisper_endpoint,
            whisper_model,
        } = patch;

        if let Some(v) = api_provider {
            self.api_provider = v;
        }
        // the masked placeholder handed out by `masked()` never overwrites a real key
        if let Some(v) = api_key.filter(|k| k != MASKED_API_KEY) {
            self.api_key = v;
        }
        if let Some(v) = api_endpoint {
            self.api_endpoint = v;
        }
        if let Some(v) = model {
            self.model = v;
        }
        if let Some(v) = speech_recognition_provider {
            self.speech_recognition_provider = v;
        }
        if let Some(v) = whisper_endpoint {
            self.whisper_endpoint = v;
        }
        if let Some(v) = whisper_model {
            self.whisper_model = v;
        }
    }

    pub fn provider(&self) -> Provider {
        Provider::from_id(&self.api_provider)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Builds the summarization snapshot. A blank endpoint or model falls
    /// back to the catalog entry of the selected provider.
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        if !self.has_api_key() {
            return Err(KratkoError::MissingApiKey);
        }

        let provider = self.provider();
        let info = provider.config();
        let endpoint = non_empty(&self.api_endpoint).unwrap_or(info.endpoint);
        if endpoint.is_empty() {
            return Err(KratkoError::InvalidConfig {
                reason: format!("no API endpoint configured for {}", info.name),
            });
        }
        let model = non_empty(&self.model)
            .or_else(|| info.models.first().copied())
            .ok_or_else(|| KratkoError::InvalidConfig {
                reason: format!("no model configured for {}", info.name),
            })?;

        Ok(ProviderConfig::new(
            provider,
            endpoint,
            model,
            self.api_key.trim(),
        ))
    }

    pub fn transcription_endpoint(&self) -> &str {
        non_empty(&self.whisper_endpoint).unwrap_or(DEFAULT_TRANSCRIPTION_ENDPOINT)
    }

    pub fn transcription_model(&self) -> &str {
        non_empty(&self.whisper_model).unwrap_or(DEFAULT_TRANSCRIPTION_MODEL)
    }

    /// Settings as shown to the UI: the key replaced by a placeholder plus
    /// a `hasApiKey` flag.
    pub fn masked(&self) -> Value {
        let mut value = json!(self);
        value["apiKey"] = json!(if self.has_api_key() { MASKED_API_KEY } else { "" });
        value["hasApiKey"] = json!(self.has_api_key());
        value
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Key-value persistence for settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Reads the stored settings over the defaults.
pub async fn load_settings(store: &dyn SettingsStore) -> Result<Settings> {
    match store.get(CONFIG_KEY).await? {
        Some(Value::Null) | None => Ok(Settings::default()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

/// Merges `patch` into the stored settings and writes the result back.
pub async fn save_settings(store: &dyn SettingsStore, patch: SettingsPatch) -> Result<Settings> {
    let mut settings = load_settings(store).await?;
    settings.merge(patch);
    store.set(CONFIG_KEY, serde_json::to_value(&settings)?).await?;
    debug!(provider = settings.api_provider.as_str(), "Settings saved");
    Ok(settings)
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .lock()
            .expect("MemoryStore poisoned")
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .expect("MemoryStore poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<serde_json::Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Default::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Default::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pretty = serde_json::to_string_pretty(&Value::Object(all))?;
        tokio::fs::write(&self.path, pretty).await?;
        Ok(())
    }
}

pub fn default_store_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kratko")
        .join("storage.json")
}
