use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    error::{KratkoError, Result, upstream_message},
    provider::{ProviderConfig, ProviderKind},
    types::VideoContext,
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f64 = 0.7;
const UNKNOWN: &str = "Unknown";

/// Short sample sent by the connection test.
pub const CONNECTION_TEST_TEXT: &str =
    "This is a short test message used to verify the API connection.";

const SYSTEM_PROMPT: &str = r#"You are a professional video content summarization assistant. Using the provided video transcript, write a clearly structured and accurate summary in Chinese.

The summary must contain:
- 📌 Key points (3-5 items)
- 📝 Content summary (a detailed overview of 200-300 characters)
- 🎯 Main arguments or conclusions
- 💡 Details or highlights worth noting

Only reflect what the video actually says. Do not add information that is not in the transcript."#;

fn user_prompt(text: &str, video: &VideoContext, language: &str) -> String {
    format!(
        "Video title: {title}\nAuthor: {author}\nTranscript language: {language}\n\nTranscript:\n{text}\n\nWrite the summary:",
        title = video.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(UNKNOWN),
        author = video.author.as_deref().filter(|a| !a.is_empty()).unwrap_or(UNKNOWN),
    )
}

/// Sends one summarization request to the configured provider.
#[derive(Clone, Default)]
pub struct SummaryClient {
    client: reqwest::Client,
}

impl SummaryClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn summarize(
        &self,
        text: &str,
        video: &VideoContext,
        language: &str,
        config: &ProviderConfig,
    ) -> Result<String> {
        if !config.api_key_present() {
            return Err(KratkoError::MissingApiKey);
        }

        let user = user_prompt(text, video, language);
        let request = match config.kind {
            ProviderKind::OpenAiCompatible => self
                .client
                .post(&config.endpoint)
                .bearer_auth(config.api_key())
                .json(&json!({
                    "model": config.model,
                    "messages": [
                        { "role": "system", "content": SYSTEM_PROMPT },
                        { "role": "user", "content": user },
                    ],
                    "temperature": TEMPERATURE,
                    "max_tokens": MAX_TOKENS,
                })),
            ProviderKind::Anthropic => self
                .client
                .post(&config.endpoint)
                .header("x-api-key", config.api_key())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": config.model,
                    "max_tokens": MAX_TOKENS,
                    "system": SYSTEM_PROMPT,
                    "messages": [
                        { "role": "user", "content": user },
                    ],
                })),
        };

        debug!(
            provider = config.provider.id(),
            model = config.model.as_str(),
            chars = text.len(),
            "Requesting summary"
        );
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(KratkoError::ApiRequestFailed {
                status: status.as_u16(),
                message: upstream_message(status, &body),
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| KratkoError::InvalidResponse {
            reason: e.to_string(),
        })?;
        let summary = extract_summary(config.kind, &value)?;
        info!(provider = config.provider.id(), chars = summary.len(), "Summary generated");
        Ok(summary)
    }
}

fn extract_summary(kind: ProviderKind, value: &Value) -> Result<String> {
    let content = match kind {
        ProviderKind::OpenAiCompatible => &value["choices"][0]["message"]["content"],
        ProviderKind::Anthropic => &value["content"][0]["text"],
    };

    content
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| KratkoError::InvalidResponse {
            reason: format!("missing summary text in {value}"),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
    };

    use super::*;
    use crate::{provider::Provider, test_support::spawn_server};

    #[derive(Clone, Default)]
    struct Recorded {
        calls: Arc<AtomicUsize>,
        request: Arc<Mutex<Option<(HeaderMap, Value)>>>,
    }

    async fn serve(status: StatusCode, body: &'static str) -> (String, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route(
                "/v1/chat",
                post(
                    move |State(rec): State<Recorded>, headers: HeaderMap, Json(req): Json<Value>| async move {
                        rec.calls.fetch_add(1, Ordering::SeqCst);
                        *rec.request.lock().unwrap() = Some((headers, req));
                        (status, body)
                    },
                ),
            )
            .with_state(recorded.clone());
        let base = spawn_server(app).await;
        (format!("{base}/v1/chat"), recorded)
    }

    fn video() -> VideoContext {
        VideoContext {
            video_id: "abc".into(),
            title: Some("Rust in 100s".into()),
            author: None,
            duration_seconds: Some(100),
        }
    }

    #[tokio::test]
    async fn openai_compatible_request_and_response() {
        let (url, rec) = serve(
            StatusCode::OK,
            r#"{"choices":[{"message":{"role":"assistant","content":"short summary"}}]}"#,
        )
        .await;
        let cfg = ProviderConfig::new(Provider::Deepseek, url, "deepseek-chat", "sk-1");

        let summary = SummaryClient::default()
            .summarize("the text", &video(), "english", &cfg)
            .await
            .unwrap();
        assert_eq!(summary, "short summary");

        let (headers, req) = rec.request.lock().unwrap().clone().unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-1");
        assert_eq!(req["model"], "deepseek-chat");
        assert_eq!(req["temperature"], 0.7);
        assert_eq!(req["max_tokens"], 2000);
        assert_eq!(req["messages"][0]["role"], "system");
        let user = req["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Rust in 100s"));
        assert!(user.contains("Author: Unknown"));
        assert!(user.contains("english"));
        assert!(user.contains("the text"));
    }

    #[tokio::test]
    async fn anthropic_request_and_response() {
        let (url, rec) = serve(
            StatusCode::OK,
            r#"{"content":[{"type":"text","text":"claude summary"}]}"#,
        )
        .await;
        let cfg = ProviderConfig::new(Provider::Anthropic, url, "claude-3-haiku-20240307", "ak");

        let summary = SummaryClient::default()
            .summarize("t", &video(), "chinese", &cfg)
            .await
            .unwrap();
        assert_eq!(summary, "claude summary");

        let (headers, req) = rec.request.lock().unwrap().clone().unwrap();
        assert_eq!(headers["x-api-key"], "ak");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert!(headers.get("authorization").is_none());
        assert_eq!(req["system"], SYSTEM_PROMPT);
        assert_eq!(req["messages"].as_array().unwrap().len(), 1);
        assert_eq!(req["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn unauthorized_carries_the_provider_message() {
        let (url, _) = serve(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"bad key"}}"#).await;
        let cfg = ProviderConfig::new(Provider::Openai, url, "gpt-4o-mini", "wrong");

        let err = SummaryClient::default()
            .summarize("t", &video(), "english", &cfg)
            .await
            .unwrap_err();
        match &err {
            KratkoError::ApiRequestFailed { status, message } => {
                assert_eq!(*status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "API request failed: 401 - bad key");
    }

    #[tokio::test]
    async fn non_json_error_body_uses_the_status_reason() {
        let (url, _) = serve(StatusCode::TOO_MANY_REQUESTS, "slow down").await;
        let cfg = ProviderConfig::new(Provider::Openai, url, "gpt-4o-mini", "k");

        match SummaryClient::default()
            .summarize("t", &video(), "english", &cfg)
            .await
            .unwrap_err()
        {
            KratkoError::ApiRequestFailed { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Too Many Requests");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_summary_field_is_invalid_response() {
        let (url, _) = serve(StatusCode::OK, r#"{"choices":[]}"#).await;
        let cfg = ProviderConfig::new(Provider::Openai, url, "gpt-4o-mini", "k");

        assert!(matches!(
            SummaryClient::default()
                .summarize("t", &video(), "english", &cfg)
                .await,
            Err(KratkoError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn missing_key_makes_zero_calls() {
        let (url, rec) = serve(StatusCode::OK, "{}").await;
        let cfg = ProviderConfig::new(Provider::Openai, url, "gpt-4o-mini", "");

        assert!(matches!(
            SummaryClient::default()
                .summarize("t", &video(), "english", &cfg)
                .await,
            Err(KratkoError::MissingApiKey)
        ));
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    }
}
