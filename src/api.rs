//! HTTP API for the site: speech, summaries, engagement counters, referrals.
//!
//! Every error is a JSON `{ "error": "..." }` body with a matching status.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::engagement::{EngagementError, EngagementStore, LikeStatus, Visitor};
use crate::gemini::{GeminiError, SpeechSynthesizer, Summarizer};
use crate::idcode::CodeError;
use crate::referrals::{
    JsonlReferralRepository, NewReferral, Referral, ReferralPatch, ReferralService, StoreError,
};

#[derive(Clone)]
pub struct AppState {
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub summarizer: Arc<dyn Summarizer>,
    pub engagement: Arc<EngagementStore>,
    pub referrals: Arc<ReferralService<JsonlReferralRepository>>,
    pub max_tts_chars: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    /// The request body or query could not be decoded.
    #[error("{1}")]
    Rejected(StatusCode, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejected(status, _) => *status,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

/// `Json` whose rejections use the JSON error body.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `Query` whose rejections use the JSON error body.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

impl From<GeminiError> for ApiError {
    fn from(err: GeminiError) -> Self {
        warn!("Gemini call failed: {err}");
        ApiError::Internal(err.to_string())
    }
}

impl From<EngagementError> for ApiError {
    fn from(err: EngagementError) -> Self {
        warn!("Engagement store failed: {err}");
        ApiError::Internal("Internal server error".into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Referral not found: {id}")),
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            StoreError::Code(CodeError::Exhausted) => {
                ApiError::Conflict("Referral ID codes are exhausted".into())
            }
            other => {
                warn!("Referral store failed: {other}");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- Request/Response types ---

#[derive(Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsResponse {
    audio_data: String,
}

#[derive(Deserialize)]
struct SummarizeRequest {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct SummarizeResponse {
    summary: String,
}

#[derive(Deserialize)]
struct SlugBody {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Serialize)]
struct ViewsResponse {
    views: usize,
}

fn require_slug(slug: Option<String>) -> Result<String, ApiError> {
    slug.filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Slug is required".into()))
}

/// Visitor identity from proxy headers, `"unknown"` when absent.
fn visitor(headers: &HeaderMap) -> Visitor {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    Visitor::new(header("x-forwarded-for"), header("user-agent"))
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tts", post(handle_tts))
        .route("/api/summarize", post(handle_summarize))
        .route("/api/views", post(handle_view))
        .route(
            "/api/likes",
            get(handle_get_likes).post(handle_like).delete(handle_unlike),
        )
        .route(
            "/api/referrals",
            get(handle_list_referrals).post(handle_create_referral),
        )
        .route(
            "/api/referrals/{id_code}",
            get(handle_get_referral).put(handle_update_referral),
        )
        .with_state(state)
}

/// Serve the API until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
}

// --- Handlers ---

async fn handle_tts(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TtsRequest>,
) -> ApiResult<TtsResponse> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text is required".into()));
    }

    let total = req.text.chars().count();
    let text: String = if total > state.max_tts_chars {
        info!("Truncating TTS input from {total} to {} chars", state.max_tts_chars);
        req.text.chars().take(state.max_tts_chars).collect()
    } else {
        req.text
    };

    let audio_data = state.speech.synthesize(&text).await?;
    Ok(Json(TtsResponse { audio_data }))
}

async fn handle_summarize(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SummarizeRequest>,
) -> ApiResult<SummarizeResponse> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Content is required".into()));
    }
    let summary = state.summarizer.summarize(&req.content).await?;
    Ok(Json(SummarizeResponse { summary }))
}

async fn handle_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SlugBody>,
) -> ApiResult<ViewsResponse> {
    let slug = require_slug(req.slug)?;
    let views = state.engagement.record_view(&slug, &visitor(&headers))?;
    Ok(Json(ViewsResponse { views }))
}

async fn handle_get_likes(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<SlugBody>,
) -> ApiResult<LikeStatus> {
    let slug = require_slug(query.slug)?;
    Ok(Json(state.engagement.likes(&slug, &visitor(&headers))))
}

async fn handle_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SlugBody>,
) -> ApiResult<LikeStatus> {
    let slug = require_slug(req.slug)?;
    Ok(Json(state.engagement.like(&slug, &visitor(&headers))?))
}

async fn handle_unlike(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SlugBody>,
) -> ApiResult<LikeStatus> {
    let slug = require_slug(req.slug)?;
    Ok(Json(state.engagement.unlike(&slug, &visitor(&headers))?))
}

async fn handle_list_referrals(State(state): State<AppState>) -> ApiResult<Value> {
    let docs = state.referrals.list()?;
    Ok(Json(json!({ "docs": docs, "totalDocs": docs.len() })))
}

async fn handle_create_referral(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewReferral>,
) -> Result<(StatusCode, Json<Referral>), ApiError> {
    let referral = state.referrals.create(req).await?;
    Ok((StatusCode::CREATED, Json(referral)))
}

async fn handle_get_referral(
    State(state): State<AppState>,
    Path(id_code): Path<String>,
) -> ApiResult<Referral> {
    Ok(Json(state.referrals.get(&id_code)?))
}

async fn handle_update_referral(
    State(state): State<AppState>,
    Path(id_code): Path<String>,
    ApiJson(patch): ApiJson<ReferralPatch>,
) -> ApiResult<Referral> {
    Ok(Json(state.referrals.update(&id_code, patch)?))
}
