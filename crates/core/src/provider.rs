use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Wire protocol spoken by a summarization provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAiCompatible,
    #[serde(rename = "anthropic")]
    Anthropic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Openai,
    Anthropic,
    Deepseek,
    Qwen,
    Glm,
    Kimi,
    Custom,
}

/// Catalog entry for a provider.
pub struct ProviderInfo {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub models: &'static [&'static str],
    pub kind: ProviderKind,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::Openai,
        Provider::Anthropic,
        Provider::Deepseek,
        Provider::Qwen,
        Provider::Glm,
        Provider::Kimi,
        Provider::Custom,
    ];

    pub fn config(&self) -> ProviderInfo {
        match self {
            Provider::Openai => ProviderInfo {
                name: "OpenAI",
                endpoint: "https://api.openai.com/v1/chat/completions",
                models: &["gpt-4o-mini", "gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
                kind: ProviderKind::OpenAiCompatible,
            },
            Provider::Anthropic => ProviderInfo {
                name: "Anthropic (Claude)",
                endpoint: "https://api.anthropic.com/v1/messages",
                models: &["claude-3-5-sonnet-20241022", "claude-3-haiku-20240307"],
                kind: ProviderKind::Anthropic,
            },
            Provider::Deepseek => ProviderInfo {
                name: "DeepSeek",
                endpoint: "https://api.deepseek.com/chat/completions",
                models: &["deepseek-chat", "deepseek-reasoner"],
                kind: ProviderKind::OpenAiCompatible,
            },
            Provider::Qwen => ProviderInfo {
                name: "Qwen",
                endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
                models: &["qwen-turbo", "qwen-plus", "qwen-max", "qwen-long"],
                kind: ProviderKind::OpenAiCompatible,
            },
            Provider::Glm => ProviderInfo {
                name: "Zhipu GLM",
                endpoint: "https://open.bigmodel.cn/api/paas/v4/chat/completions",
                models: &["glm-4-plus", "glm-4", "glm-4-flash", "glm-4-long"],
                kind: ProviderKind::OpenAiCompatible,
            },
            Provider::Kimi => ProviderInfo {
                name: "Kimi (Moonshot)",
                endpoint: "https://api.moonshot.cn/v1/chat/completions",
                models: &["moonshot-v1-8k", "moonshot-v1-32k", "moonshot-v1-128k"],
                kind: ProviderKind::OpenAiCompatible,
            },
            Provider::Custom => ProviderInfo {
                name: "Custom",
                endpoint: "",
                models: &[],
                kind: ProviderKind::OpenAiCompatible,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.config().name
    }

    /// Identifier stored in settings.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Deepseek => "deepseek",
            Provider::Qwen => "qwen",
            Provider::Glm => "glm",
            Provider::Kimi => "kimi",
            Provider::Custom => "custom",
        }
    }

    /// Unknown identifiers resolve to [`Provider::Custom`].
    pub fn from_id(id: &str) -> Provider {
        Provider::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(id.trim()))
            .unwrap_or(Provider::Custom)
    }

    /// The whole catalog keyed by id, as the settings UI lists it.
    pub fn catalog() -> Value {
        let entries: Map<String, Value> = Provider::ALL
            .iter()
            .map(|p| {
                let info = p.config();
                (
                    p.id().to_string(),
                    json!({
                        "name": info.name,
                        "endpoint": info.endpoint,
                        "models": info.models,
                        "type": info.kind,
                    }),
                )
            })
            .collect();
        Value::Object(entries)
    }
}

/// Validated per-request snapshot of the summarization settings.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    api_key: String,
}

impl ProviderConfig {
    pub fn new(
        provider: Provider,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            kind: provider.config().kind,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn api_key_present(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key_present", &self.api_key_present())
            .finish()
    }
}
