use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    audio::AudioBlob,
    bus::{ContextId, Dispatch, Endpoint},
    config::{CONFIG_KEY, SettingsPatch, SettingsStore, load_settings, save_settings},
    contexts::respond,
    error::{KratkoError, Result},
    provider::Provider,
    recognition::Transcriber,
    summary::SummaryClient,
    types::{SummaryRequest, SummaryResult},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest {
    audio_data: String,
    mime_type: String,
}

#[derive(Deserialize)]
struct SaveConfigRequest {
    #[serde(default)]
    config: SettingsPatch,
}

/// Long-lived background context. Keeps no session state: every request
/// reads the settings afresh, so it can be restarted between messages.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    store: Arc<dyn SettingsStore>,
    client: reqwest::Client,
    summaries: SummaryClient,
}

impl Coordinator {
    pub fn new(store: Arc<dyn SettingsStore>, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                summaries: SummaryClient::new(client.clone()),
                client,
            }),
        }
    }

    /// Writes the defaults for every setting not stored yet. Complete
    /// settings are left untouched.
    pub async fn install(&self) -> Result<()> {
        let store = self.inner.store.as_ref();
        let stored = store.get(CONFIG_KEY).await?;
        let filled = serde_json::to_value(load_settings(store).await?)?;
        if stored.as_ref() == Some(&filled) {
            debug!("Settings already initialized");
            return Ok(());
        }
        store.set(CONFIG_KEY, filled).await?;
        info!("Settings initialized");
        Ok(())
    }

    pub async fn generate_summary(&self, request: SummaryRequest) -> Result<SummaryResult> {
        let settings = load_settings(self.inner.store.as_ref()).await?;
        let config = settings.provider_config()?;
        let summary = self
            .inner
            .summaries
            .summarize(&request.text, &request.video_info, &request.language, &config)
            .await?;
        Ok(SummaryResult { summary })
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Value> {
        let settings = load_settings(self.inner.store.as_ref()).await?;
        if !settings.has_api_key() {
            return Err(KratkoError::MissingApiKey);
        }

        let blob = AudioBlob::from_base64(&request.audio_data, &request.mime_type)?;
        let transcriber = Transcriber::new(
            self.inner.client.clone(),
            settings.transcription_endpoint(),
            settings.transcription_model(),
            settings.api_key.trim(),
        );
        let text = transcriber.transcribe(&blob).await?;
        Ok(json!({ "success": true, "text": text }))
    }

    async fn config(&self) -> Result<Value> {
        let settings = load_settings(self.inner.store.as_ref()).await?;
        Ok(json!({
            "success": true,
            "config": settings.masked(),
            "providers": Provider::catalog(),
        }))
    }

    async fn save_config(&self, patch: SettingsPatch) -> Result<Value> {
        save_settings(self.inner.store.as_ref(), patch).await?;
        Ok(json!({ "success": true }))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

impl Endpoint for Coordinator {
    const CONTEXT: ContextId = ContextId::Coordinator;

    fn dispatch(&self, action: &str, payload: Value) -> Dispatch {
        let this = self.clone();
        match action {
            "generateSummary" => Dispatch::deferred(async move {
                let result = async {
                    let summary = this.generate_summary(parse(payload)?).await?;
                    Ok::<_, KratkoError>(json!({ "success": true, "summary": summary.summary }))
                };
                respond(result.await)
            }),
            "transcribeAudio" => Dispatch::deferred(async move {
                let result = async { this.transcribe(parse(payload)?).await };
                respond(result.await)
            }),
            "getConfig" => Dispatch::deferred(async move { respond(this.config().await) }),
            "saveConfig" => Dispatch::deferred(async move {
                let result = async {
                    let request: SaveConfigRequest = parse(payload)?;
                    this.save_config(request.config).await
                };
                respond(result.await)
            }),
            "pageLoaded" => {
                info!(video_id = payload["videoId"].as_str().unwrap_or_default(), "Video page loaded");
                Dispatch::Ignored
            }
            _ => {
                debug!(action, "Unknown coordinator action");
                Dispatch::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, extract::State, routing::post};

    use super::*;
    use crate::{
        config::{MemoryStore, Settings},
        test_support::spawn_server,
    };

    async fn reply(coordinator: &Coordinator, action: &str, payload: Value) -> Option<Value> {
        match coordinator.dispatch(action, payload) {
            Dispatch::Ignored => None,
            Dispatch::Immediate(value) => Some(value),
            Dispatch::Deferred(future) => Some(future.await),
        }
    }

    async fn coordinator_with(settings: Option<Settings>) -> (Coordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(settings) = settings {
            store
                .set(crate::config::CONFIG_KEY, serde_json::to_value(settings).unwrap())
                .await
                .unwrap();
        }
        (
            Coordinator::new(store.clone(), reqwest::Client::new()),
            store,
        )
    }

    /// Chat fixture answering with a canned summary and counting calls.
    async fn chat_fixture() -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/chat",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    r#"{"choices":[{"message":{"content":"a fine summary"}}]}"#
                }),
            )
            .route(
                "/transcribe",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "recognized words"
                }),
            )
            .with_state(calls.clone());
        (spawn_server(app).await, calls)
    }

    #[tokio::test]
    async fn generate_summary_without_key_makes_no_call() {
        let (base, calls) = chat_fixture().await;
        let (c, _) = coordinator_with(Some(Settings {
            api_endpoint: format!("{base}/chat"),
            ..Default::default()
        }))
        .await;

        let value = reply(
            &c,
            "generateSummary",
            json!({"text": "t", "videoInfo": {}, "language": "english"}),
        )
        .await
        .unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "missing_api_key");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generate_summary_uses_the_stored_provider() {
        let (base, calls) = chat_fixture().await;
        let (c, _) = coordinator_with(Some(Settings {
            api_key: "sk".into(),
            api_endpoint: format!("{base}/chat"),
            ..Default::default()
        }))
        .await;

        let value = reply(
            &c,
            "generateSummary",
            json!({"text": "t", "videoInfo": {"title": "x"}, "language": "english"}),
        )
        .await
        .unwrap();
        assert_eq!(value, json!({"success": true, "summary": "a fine summary"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transcribe_audio_decodes_and_uploads() {
        let (base, calls) = chat_fixture().await;
        let (c, _) = coordinator_with(Some(Settings {
            api_key: "sk".into(),
            whisper_endpoint: format!("{base}/transcribe"),
            ..Default::default()
        }))
        .await;

        let value = reply(
            &c,
            "transcribeAudio",
            json!({"audioData": "AAEC", "mimeType": "audio/webm"}),
        )
        .await
        .unwrap();
        assert_eq!(value, json!({"success": true, "text": "recognized words"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let value = reply(
            &c,
            "transcribeAudio",
            json!({"audioData": "%%%", "mimeType": "audio/webm"}),
        )
        .await
        .unwrap();
        assert_eq!(value["error"], "invalid_audio_payload");
    }

    #[tokio::test]
    async fn config_is_masked_and_saves_merge() {
        let (c, store) = coordinator_with(None).await;
        c.install().await.unwrap();

        let saved = reply(
            &c,
            "saveConfig",
            json!({"config": {"apiKey": "sk-1", "apiProvider": "kimi"}}),
        )
        .await
        .unwrap();
        assert_eq!(saved, json!({"success": true}));
        reply(&c, "saveConfig", json!({"config": {"model": "moonshot-v1-32k"}}))
            .await
            .unwrap();

        let value = reply(&c, "getConfig", json!({})).await.unwrap();
        assert_eq!(value["config"]["apiKey"], "******");
        assert_eq!(value["config"]["hasApiKey"], true);
        assert_eq!(value["config"]["apiProvider"], "kimi");
        assert_eq!(value["config"]["model"], "moonshot-v1-32k");
        assert!(value["providers"]["kimi"].is_object());

        let stored = load_settings(store.as_ref()).await.unwrap();
        assert_eq!(stored.api_key, "sk-1");
    }

    /// Memory store counting its writes.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SettingsStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }
    }

    #[tokio::test]
    async fn install_only_writes_missing_settings() {
        let store = Arc::new(CountingStore::default());
        store
            .inner
            .set(CONFIG_KEY, json!({"apiKey": "sk-kept"}))
            .await
            .unwrap();
        let c = Coordinator::new(store.clone(), reqwest::Client::new());

        c.install().await.unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        let filled = load_settings(store.as_ref()).await.unwrap();
        assert_eq!(filled.api_key, "sk-kept");
        assert_eq!(filled.api_provider, Settings::default().api_provider);

        c.install().await.unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn page_loaded_gets_no_response() {
        let (c, _) = coordinator_with(None).await;
        assert!(reply(&c, "pageLoaded", json!({"videoId": "v"})).await.is_none());
        assert!(reply(&c, "checkPage", json!({})).await.is_none());
    }
}
