//! Per-chunk speech synthesis over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::wav::{decode_audio_payload, AudioClip};

#[derive(Debug, Error)]
pub enum FetchError {
    /// The session was torn down while the request was in flight.
    #[error("fetch cancelled")]
    Cancelled,

    #[error("speech request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("speech service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("speech response carried no audio")]
    NoAudio,

    #[error("invalid audio payload: {0}")]
    Payload(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Turns one chunk of text into a playable clip.
#[async_trait]
pub trait ChunkFetcher: Send + Sync + 'static {
    async fn fetch(&self, text: &str) -> Result<AudioClip, FetchError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResponse {
    audio_data: Option<String>,
    error: Option<String>,
}

/// Calls the site's `/api/tts` route.
pub struct HttpChunkFetcher {
    client: Client,
    endpoint: String,
    sample_rate: u32,
}

impl HttpChunkFetcher {
    pub fn new(base_url: &str, sample_rate: u32, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/tts", base_url.trim_end_matches('/')),
            sample_rate,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChunkFetcher for HttpChunkFetcher {
    async fn fetch(&self, text: &str) -> Result<AudioClip, FetchError> {
        debug!("POST {} ({} chars)", self.endpoint, text.chars().count());

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&SpeechRequest { text })
            .send()
            .await?;

        let status = resp.status();
        // Error bodies are JSON too; fall back to the status line if not.
        let body: Option<SpeechResponse> = resp.json().await.ok();

        if !status.is_success() {
            let message = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(FetchError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body = body.ok_or(FetchError::NoAudio)?;
        if let Some(message) = body.error {
            return Err(FetchError::Service {
                status: status.as_u16(),
                message,
            });
        }
        let payload = body.audio_data.ok_or(FetchError::NoAudio)?;

        let pcm = decode_audio_payload(&payload).map_err(|e| FetchError::Payload(e.to_string()))?;
        AudioClip::from_pcm(&pcm, self.sample_rate).map_err(|e| FetchError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::Engine;
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(base: &str) -> HttpChunkFetcher {
        HttpChunkFetcher::new(base, 24000, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_wraps_audio() {
        let router = Router::new().route(
            "/api/tts",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["text"], "Hello there.");
                let pcm: Vec<u8> = [100i16, -100].iter().flat_map(|s| s.to_le_bytes()).collect();
                Json(json!({ "audioData": base64::engine::general_purpose::STANDARD.encode(pcm) }))
            }),
        );
        let base = serve(router).await;

        let clip = fetcher(&base).fetch("Hello there.").await.unwrap();
        let (_, rate, samples) = clip.samples().unwrap();
        assert_eq!(rate, 24000);
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    async fn test_service_error_is_reported() {
        let router = Router::new().route(
            "/api/tts",
            post(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "No audio data received" })),
                )
            }),
        );
        let base = serve(router).await;

        let err = fetcher(&base).fetch("x").await.unwrap_err();
        match err {
            FetchError::Service { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "No audio data received");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_audio_and_bad_payload() {
        let router = Router::new()
            .route("/empty/api/tts", post(|| async { Json(json!({})) }))
            .route("/bad/api/tts", post(|| async { Json(json!({ "audioData": "@@@" })) }));
        let base = serve(router).await;

        let err = fetcher(&format!("{base}/empty")).fetch("x").await.unwrap_err();
        assert!(matches!(err, FetchError::NoAudio));

        let err = fetcher(&format!("{base}/bad/")).fetch("x").await.unwrap_err();
        assert!(matches!(err, FetchError::Payload(_)));
        assert!(!err.is_cancelled());
    }
}
