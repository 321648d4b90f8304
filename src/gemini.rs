//! Gemini `generateContent` client for speech and summaries.
//!
//! Speech requests ask for an AUDIO response with a prebuilt voice; the audio
//! comes back as base64 PCM in `inlineData.data` and is passed through as-is.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const SUMMARIZE_PROMPT: &str = r#"
Please summarize the following blog post content concisely in 2-3 paragraphs.
Focus on the main ideas and key takeaways. Use bullet points with hyphens symbols to highlight the main points.
Only show what the main ideas and key takeaways. Translate the content based on content language if possible.
Do not use any formatting or special characters. Do not use external links or references.
Focus only on the blog content.

Content:
{content}"#;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Gemini request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gemini returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Model returned text instead of audio")]
    TextInsteadOfAudio,

    #[error("No audio data received")]
    NoAudio,

    #[error("Model returned an empty summary")]
    EmptySummary,
}

/// Text → base64 PCM audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<String, GeminiError>;
}

/// Article body → short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, content: &str) -> Result<String, GeminiError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: Option<String>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|c| c.parts.iter())
    }

    fn audio(&self) -> Option<&str> {
        self.parts()
            .filter_map(|p| p.inline_data.as_ref()?.data.as_deref())
            .find(|d| !d.is_empty())
    }

    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }
}

pub struct GeminiClient {
    client: Client,
    host: String,
    api_key: Option<String>,
    tts_model: String,
    voice: String,
    summary_model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: Option<String>) -> Result<Self, GeminiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("{API_KEY_ENV} is not set; speech and summaries will fail");
        }

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            api_key,
            tts_model: config.tts_model.clone(),
            voice: config.voice.clone(),
            summary_model: config.summary_model.clone(),
        })
    }

    /// Build a client with the key taken from `GEMINI_API_KEY`.
    pub fn from_env(config: &GeminiConfig) -> Result<Self, GeminiError> {
        Self::new(config, std::env::var(API_KEY_ENV).ok())
    }

    async fn generate(&self, model: &str, body: Value) -> Result<GenerateResponse, GeminiError> {
        let key = self.api_key.as_deref().ok_or(GeminiError::MissingApiKey)?;
        let model = model.trim_start_matches("models/");
        let url = format!("{}/v1beta/models/{model}:generateContent", self.host);
        debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"))
                .to_string();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str) -> Result<String, GeminiError> {
        let t_start = Instant::now();
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        });

        let response = self.generate(&self.tts_model, body).await?;
        if let Some(audio) = response.audio() {
            info!(
                "Synthesized {} chars in {:.0}ms",
                text.chars().count(),
                t_start.elapsed().as_secs_f64() * 1000.0
            );
            return Ok(audio.to_string());
        }

        let spoken = response.text();
        if !spoken.is_empty() {
            warn!("Gemini returned text instead of audio: {spoken}");
            return Err(GeminiError::TextInsteadOfAudio);
        }
        Err(GeminiError::NoAudio)
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(&self, content: &str) -> Result<String, GeminiError> {
        let t_start = Instant::now();
        let prompt = SUMMARIZE_PROMPT.replace("{content}", content);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let response = self.generate(&self.summary_model, body).await?;
        let summary = response.text().trim().to_string();
        if summary.is_empty() {
            return Err(GeminiError::EmptySummary);
        }
        info!(
            "Summarized {} chars → {} chars ({:.0}ms)",
            content.chars().count(),
            summary.chars().count(),
            t_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(host: &str, key: Option<&str>) -> GeminiClient {
        let config = GeminiConfig {
            host: host.to_string(),
            timeout_secs: 5,
            ..GeminiConfig::default()
        };
        GeminiClient::new(&config, key.map(String::from)).unwrap()
    }

    /// Answers every generateContent call with `reply`, recording the path,
    /// key header and request body.
    fn mock(reply: Value, seen: Arc<Mutex<Vec<(String, String, Value)>>>) -> Router {
        Router::new().route(
            "/v1beta/models/{call}",
            post(
                move |Path(call): Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                    let reply = reply.clone();
                    let seen = seen.clone();
                    async move {
                        let key = headers
                            .get("x-goog-api-key")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.lock().unwrap().push((call, key, body));
                        Json(reply)
                    }
                },
            ),
        )
    }

    #[tokio::test]
    async fn test_missing_key() {
        let gemini = client("http://127.0.0.1:9", None);
        let err = gemini.synthesize("hi").await.unwrap_err();
        assert!(matches!(err, GeminiError::MissingApiKey));
        assert_eq!(err.to_string(), "GEMINI_API_KEY is not configured");
        assert!(matches!(
            gemini.summarize("hi").await.unwrap_err(),
            GeminiError::MissingApiKey
        ));
    }

    #[tokio::test]
    async fn test_synthesize_returns_inline_audio() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reply = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "audio/L16;rate=24000", "data": "AAEC" } }
            ]}}]
        });
        let base = serve(mock(reply, seen.clone())).await;

        let audio = client(&base, Some("k-123")).synthesize("Hello.").await.unwrap();
        assert_eq!(audio, "AAEC");

        let seen = seen.lock().unwrap();
        let (call, key, body) = &seen[0];
        assert_eq!(call, "gemini-2.5-flash-preview-tts:generateContent");
        assert_eq!(key, "k-123");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello.");
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
    }

    #[tokio::test]
    async fn test_text_instead_of_audio() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reply = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot speak." }] } }]
        });
        let base = serve(mock(reply, seen)).await;

        let err = client(&base, Some("k")).synthesize("x").await.unwrap_err();
        assert!(matches!(err, GeminiError::TextInsteadOfAudio));
    }

    #[tokio::test]
    async fn test_empty_response_has_no_audio() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = serve(mock(json!({}), seen)).await;
        let err = client(&base, Some("k")).synthesize("x").await.unwrap_err();
        assert!(matches!(err, GeminiError::NoAudio));
    }

    #[tokio::test]
    async fn test_summarize_uses_prompt_and_model() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reply = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "- First idea\n" }, { "text": "- Second idea\n" }
            ]}}]
        });
        let base = serve(mock(reply, seen.clone())).await;

        let summary = client(&base, Some("k")).summarize("Post body.").await.unwrap();
        assert_eq!(summary, "- First idea\n- Second idea");

        let seen = seen.lock().unwrap();
        let (call, _, body) = &seen[0];
        assert_eq!(call, "gemini-3-flash-preview:generateContent");
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("2-3 paragraphs"));
        assert!(prompt.ends_with("Content:\nPost body."));
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let router = Router::new().route(
            "/v1beta/models/{call}",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": { "code": 429, "message": "Quota exceeded" } })),
                )
            }),
        );
        let base = serve(router).await;

        match client(&base, Some("k")).summarize("x").await.unwrap_err() {
            GeminiError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
