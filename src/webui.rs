use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::config::{ApiStyle, Config};
use crate::pipeline::{
    CommandOutcome, NullSink, Pipeline, PipelineError, PromptRequest, ReplySink,
};

const BODY_LIMIT_BYTES: usize = 5 * 1024 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    summary: Arc<StateResponse>,
}

pub fn router(pipeline: Arc<Pipeline>, cfg: &Config) -> Router {
    let resolver = pipeline.executor().resolver();
    let summary = StateResponse {
        base: resolver.base().display().to_string(),
        full_access: resolver.is_full_access(),
        api_style: cfg.api_style,
        base_url: cfg.base_url.clone(),
        model: cfg.model.clone(),
        max_actions: pipeline.max_actions(),
        read_max_bytes: cfg.read_max_bytes,
        auto_resolve_bare_names: cfg.auto_resolve_bare_names,
        allow_shell: cfg.allow_shell,
    };
    let state = AppState {
        pipeline,
        summary: Arc::new(summary),
    };

    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/state", get(api_state))
        .route("/api/ai/command", post(api_command))
        .route("/api/ai/command/sync", post(api_command_sync))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_web(cfg: &Config, pipeline: Arc<Pipeline>) -> Result<()> {
    let app = router(pipeline, cfg);
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.host, cfg.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "filewright listening");
    println!("filewright running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_health() -> Json<Value> {
    Json(json!({"ok": true, "now": Utc::now().to_rfc3339()}))
}

async fn api_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(state.summary.as_ref().clone())
}

/// Streams `data: {...}` frames: reply deltas while the model talks, then a
/// single `complete` frame with the results or the error.
async fn api_command(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    let status = match payload {
        Ok(Json(req)) => {
            let pipeline = state.pipeline.clone();
            tokio::spawn(async move {
                let mut sink = ChannelSink { tx: tx.clone() };
                let data = match pipeline.run(&req, &mut sink).await {
                    Ok(outcome) => serde_json::to_value(&outcome),
                    Err(err) => serde_json::to_value(ErrorBody::from(&err)),
                }
                .unwrap_or_else(|e| json!({"error": e.to_string()}));
                if tx.send(complete_frame(data)).is_err() {
                    debug!("client went away before the final frame");
                }
            });
            StatusCode::OK
        }
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "rejected command body");
            let data = serde_json::to_value(ErrorBody::from(&rejection))
                .unwrap_or_else(|e| json!({"error": e.to_string()}));
            let _ = tx.send(complete_frame(data));
            rejection.status()
        }
    };

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (
        status,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn api_command_sync(
    State(state): State<AppState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> ApiResult<Json<CommandOutcome>> {
    let Json(req) =
        payload.map_err(|rejection| (rejection.status(), Json(ErrorBody::from(&rejection))))?;
    let outcome = state
        .pipeline
        .run(&req, &mut NullSink)
        .await
        .map_err(api_err)?;
    Ok(Json(outcome))
}

fn api_err(err: PipelineError) -> (StatusCode, Json<ErrorBody>) {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(ErrorBody::from(&err)))
}

fn sse_frame(value: &Value) -> String {
    format!("data: {value}\n\n")
}

fn complete_frame(data: Value) -> String {
    sse_frame(&json!({"type": "complete", "data": data}))
}

/// Forwards reply deltas to the response stream. A closed receiver means the
/// client disconnected; the pipeline keeps running and the frames are dropped.
struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ReplySink for ChannelSink {
    fn delta(&mut self, text: &str) {
        let _ = self
            .tx
            .send(sse_frame(&json!({"type": "delta", "data": text})));
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            error: err.to_string(),
            raw: err.raw().map(str::to_string),
        }
    }
}

impl From<&JsonRejection> for ErrorBody {
    fn from(rejection: &JsonRejection) -> Self {
        Self {
            error: format!("Invalid request body: {}", rejection.body_text()),
            raw: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct StateResponse {
    base: String,
    full_access: bool,
    api_style: ApiStyle,
    base_url: String,
    model: String,
    max_actions: usize,
    read_max_bytes: u64,
    auto_resolve_bare_names: bool,
    allow_shell: bool,
}
