pub mod config;
pub mod error;
pub mod validation;

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Router,
};
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use tts_core::concat::is_concat_safe;
use tts_core::{
    AppendConcatenator, AudioCombiner, AudioConcatenator, ElevenLabsClient, FfmpegConcatenator,
};

use crate::config::{ConcatBackend, ServerConfig};
use crate::error::ApiError;
use crate::validation::parse_lines;

#[derive(Clone)]
pub struct AppState {
    pub combiner: Arc<AudioCombiner>,
}

impl AppState {
    pub fn new(combiner: AudioCombiner) -> Self {
        Self {
            combiner: Arc::new(combiner),
        }
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        if config.elevenlabs.api_key.is_none() {
            warn!("ELEVENLABS_API_KEY is not set; every combine request will fail");
        }
        let synthesizer = Arc::new(ElevenLabsClient::new(config.elevenlabs.clone())?);

        let concatenator: Arc<dyn AudioConcatenator> = match config.concat_backend {
            ConcatBackend::Ffmpeg => {
                if !is_concat_safe(&config.temp_dir) {
                    anyhow::bail!(
                        "TEMP_DIR {} contains '|', which the ffmpeg backend cannot use",
                        config.temp_dir.display()
                    );
                }
                Arc::new(FfmpegConcatenator::new(&config.ffmpeg_path))
            }
            ConcatBackend::Append => Arc::new(AppendConcatenator),
        };

        let combiner = AudioCombiner::new(synthesizer, concatenator, &config.temp_dir)
            .with_concurrency(config.synthesis_concurrency);
        Ok(Self::new(combiner))
    }
}

/// Routes only, no middleware. Mounted at the root and under `/api`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route(
            "/combine-audio",
            post(combine_audio).fallback(method_not_allowed),
        );

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// Full application: routes plus request id, tracing, rate limit, timeout,
/// body limit and CORS layers.
pub fn app(state: AppState, config: &ServerConfig) -> anyhow::Result<Router> {
    // Using GlobalKeyExtractor so every client shares one budget; peer IPs
    // are unreliable behind proxies.
    let replenish_ms = (60_000 / config.rate_limit_per_minute.max(1)).max(1) as u64;
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    Ok(router(state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack))
}

// A request that outlives the timeout is a server-side failure, reported as
// the same generic 500 as any other.
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::Processing("request timed out".to_string())
    } else {
        ApiError::Processing(format!("unhandled middleware error: {err}"))
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        base.allow_origin(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(ref value) = value {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method Not Allowed",
    )
}

/// Synthesize every line, merge the clips and stream the MP3 back. The
/// merged file is deleted once the body stream is finished or dropped.
pub async fn combine_audio(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let lines = parse_lines(&body)?;
    info!("Combine request received: {} lines", lines.len());

    let merged = state.combiner.combine(&lines).await?;
    let content_length = merged
        .len()
        .await
        .map_err(|e| ApiError::Processing(format!("merged file unreadable: {e}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CONTENT_LENGTH, content_length)
        .body(Body::from_stream(merged.into_stream()))
        .map_err(|e| ApiError::Processing(format!("failed to build response: {e}")))
}
