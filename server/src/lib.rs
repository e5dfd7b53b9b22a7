pub mod config;
pub mod error;
pub mod validation;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{Html, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{request, StreamStore, SynthesisRequest, TtsManager, VoiceCatalog};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::validate_tts_request;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub tts: Arc<TtsManager>,
    pub store: Arc<StreamStore>,
    /// Cancelled on shutdown; every synthesis runs under a child of it.
    pub shutdown: CancellationToken,
    pub config: ServerConfig,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamResponse {
    pub stream_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Build the application router with its middleware stack.
pub fn app(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        // Bounds the time to response headers; a streaming body may run longer.
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/healthcheck", get(health_check))
        .route("/voices", get(list_voices))
        .route("/tts", get(tts_endpoint).post(tts_endpoint))
        .route("/tts/stream", post(create_stream))
        .route("/tts/stream/{stream_id}", get(fetch_stream));

    Router::new()
        .route("/", get(index))
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS has no valid origins, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    // A hyphenated UUID is always a valid header value.
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert("x-request-id", value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", value);
    response
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_voices(State(state): State<AppState>) -> Json<VoiceCatalog> {
    Json(state.tts.voices().catalog().clone())
}

/// Synthesize immediately. POST bodies are JSON; GET reads the query only.
pub async fn tts_endpoint(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = (method == Method::POST).then_some(body.as_ref());
    let request = request::resolve(body, &query)?;
    stream_response(&state, request).await
}

/// Store a request and hand back a handle that can be fetched until it expires.
pub async fn create_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<CreateStreamResponse>, ApiError> {
    let request = request::resolve(Some(body.as_ref()), &query)?;
    validate_tts_request(&request)?;

    let (stream_id, expires_at) = state.store.create(request);
    info!(%stream_id, %expires_at, "created pending stream");
    Ok(Json(CreateStreamResponse {
        stream_id,
        expires_at,
    }))
}

pub async fn fetch_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Response, ApiError> {
    let request = Uuid::parse_str(&stream_id)
        .ok()
        .and_then(|id| state.store.fetch(&id))
        .ok_or_else(|| ApiError::NotFound(format!("Stream {stream_id} not found or expired")))?;
    stream_response(&state, request).await
}

/// Start the engine and build the chunked WAV response.
///
/// Nothing is sent until the engine has started, so every failure up to that
/// point still gets its own status code.
async fn stream_response(state: &AppState, request: SynthesisRequest) -> Result<Response, ApiError> {
    validate_tts_request(&request)?;

    let prepared = state
        .tts
        .prepare(&request, state.shutdown.child_token())
        .await?;
    info!(
        voice = %request.voice,
        speaker_id = prepared.speaker_id,
        sample_rate = prepared.format.sample_rate,
        chars = request.text.chars().count(),
        "streaming synthesis"
    );

    let body = Body::from_stream(prepared.into_wav_stream().map(Ok::<_, Infallible>));
    axum::http::Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::TRANSFER_ENCODING, "chunked")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ApiError::InternalError(format!("Failed to build audio response: {e}")))
}
