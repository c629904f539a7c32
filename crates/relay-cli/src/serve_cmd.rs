use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use relay_core::{
    ChannelRegistry, EventProducer, Payload, RegistryProducer, RegistryStats, RelayError,
    StreamConfig, StreamConsumer,
};

use crate::config::RelayConfig;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::AlreadySubscribed { .. } => Self::conflict(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body accepted by the internal push boundary.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub event_type: String,
    pub data: Payload,
}

impl PushRequest {
    /// The event type becomes the `event:` line of a frame, so it must be a
    /// single non-empty line.
    fn validate(&self) -> Result<(), AppError> {
        if self.event_type.is_empty() {
            return Err(AppError::bad_request("event_type must not be empty"));
        }
        if self.event_type.contains(['\n', '\r']) {
            return Err(AppError::bad_request(
                "event_type must not contain line breaks",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: &'static str,
    pub run_id: String,
}

impl AckResponse {
    fn ok(run_id: String) -> Self {
        Self {
            status: "ok",
            run_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: RegistryStats,
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

/// Shared handler state. One registry per process.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ChannelRegistry>,
    producer: Arc<dyn EventProducer>,
    stream_config: StreamConfig,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(stream_config: StreamConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ChannelRegistry::with_config(&stream_config));
        let producer: Arc<dyn EventProducer> =
            Arc::new(RegistryProducer::new(Arc::clone(&registry)));
        Self {
            registry,
            producer,
            stream_config,
            shutdown,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/runs/{run_id}/events", get(stream_events))
        .route("/internal/runs/{run_id}/events", post(push_event))
        .route("/internal/runs/{run_id}/close", post(close_run))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(config: RelayConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let app = build_router(AppState::new(config.stream.clone(), shutdown.clone()));
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;

    tracing::info!(
        keepalive_secs = config.stream.keepalive_interval.as_secs(),
        max_buffered_events = ?config.stream.max_buffered_events,
        "relay listening on http://{addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tokio::spawn(shutdown_signal(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("relay shut down");
    Ok(())
}

/// Cancel `token` on Ctrl+C. Open event streams end when it fires, so
/// graceful shutdown does not wait on idle subscribers.
async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutdown requested");
    token.cancel();
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: state.registry.stats(),
    })
}

async fn push_event(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<PushRequest>,
) -> Result<Json<AckResponse>, AppError> {
    body.validate()?;
    state
        .producer
        .push(&run_id, body.event_type.into(), body.data);
    Ok(Json(AckResponse::ok(run_id)))
}

async fn close_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Json<AckResponse> {
    state.producer.close(&run_id);
    Json(AckResponse::ok(run_id))
}

async fn stream_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let consumer = StreamConsumer::open(&state.registry, &run_id, &state.stream_config)?;

    let frames = consumer
        .into_stream()
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|frame| Ok::<_, Infallible>(frame.render()));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relay_core::ChannelState;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn test_state() -> AppState {
        AppState::new(StreamConfig::default(), CancellationToken::new())
    }

    async fn get(state: &AppState, uri: &str) -> axum::response::Response {
        build_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(state: &AppState, uri: &str, body: serde_json::Value) -> axum::response::Response {
        build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_push_returns_ok_and_buffers() {
        let state = test_state();

        let resp = post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"event_type": "node_update", "data": {"node": "A", "status": "running"}}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({"status": "ok", "run_id": "r1"})
        );
        assert_eq!(state.registry.state("r1"), Some(ChannelState::Pending));
        assert_eq!(state.registry.buffered_len("r1"), 1);
    }

    #[tokio::test]
    async fn test_push_rejects_non_object_data() {
        let state = test_state();

        let resp = post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"event_type": "node_update", "data": [1, 2, 3]}),
        )
        .await;
        assert!(resp.status().is_client_error(), "got {}", resp.status());
        assert_eq!(state.registry.state("r1"), None, "rejected push must not reach the core");
    }

    #[tokio::test]
    async fn test_push_rejects_missing_event_type() {
        let state = test_state();

        let resp = post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"data": {}}),
        )
        .await;
        assert!(resp.status().is_client_error(), "got {}", resp.status());
        assert_eq!(state.registry.state("r1"), None);
    }

    #[tokio::test]
    async fn test_push_rejects_empty_or_multiline_event_type() {
        let state = test_state();

        for event_type in [
            "",
            "x\n\nevent: workflow_complete\ndata: {}",
            "node_update\r",
        ] {
            let resp = post_json(
                &state,
                "/internal/runs/r1/events",
                serde_json::json!({"event_type": event_type, "data": {}}),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "event_type {event_type:?}");
            let json = body_json(resp).await;
            assert!(json["error"].as_str().unwrap().contains("event_type"));
        }
        assert_eq!(state.registry.state("r1"), None, "rejected push must not reach the core");
    }

    #[tokio::test]
    async fn test_stream_preserves_payload_key_order() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/runs/r1/events")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"event_type":"node_update","data":{"status":"running","node":"A"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        state.registry.push("r1", "workflow_complete", Payload::new());

        let resp = get(&state, "/runs/r1/events").await;
        assert_eq!(
            body_text(resp).await,
            "event: node_update\ndata: {\"status\":\"running\",\"node\":\"A\"}\n\n\
             event: workflow_complete\ndata: {}\n\n"
        );
    }

    #[tokio::test]
    async fn test_stream_delivers_buffered_frames_until_complete() {
        let state = test_state();
        post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"event_type": "node_update", "data": {"node": "A", "status": "running"}}),
        )
        .await;
        post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"event_type": "workflow_complete", "data": {}}),
        )
        .await;

        let resp = get(&state, "/runs/r1/events").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .expect("should have content-type header")
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(content_type, "text/event-stream");

        assert_eq!(
            body_text(resp).await,
            "event: node_update\ndata: {\"node\":\"A\",\"status\":\"running\"}\n\n\
             event: workflow_complete\ndata: {}\n\n"
        );
        assert_eq!(state.registry.state("r1"), None);
    }

    #[tokio::test]
    async fn test_second_subscriber_gets_conflict() {
        let state = test_state();

        let first = get(&state, "/runs/r1/events").await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = get(&state, "/runs/r1/events").await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = body_json(second).await;
        assert!(
            json["error"].as_str().unwrap().contains("r1"),
            "unexpected error body: {json}"
        );

        // Dropping the first response is a client disconnect.
        drop(first);
        assert_eq!(state.registry.state("r1"), None);
    }

    #[tokio::test]
    async fn test_close_ends_stream_without_frame() {
        let state = test_state();
        post_json(
            &state,
            "/internal/runs/r1/events",
            serde_json::json!({"event_type": "log", "data": {"line": "hello"}}),
        )
        .await;

        let resp = post_json(&state, "/internal/runs/r1/close", serde_json::json!({})).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["run_id"], "r1");

        let resp = get(&state, "/runs/r1/events").await;
        assert_eq!(
            body_text(resp).await,
            "event: log\ndata: {\"line\":\"hello\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        let state = test_state();
        let resp = get(&state, "/runs/r1/events").await;
        assert_eq!(state.registry.state("r1"), Some(ChannelState::Active));

        state.shutdown.cancel();
        assert_eq!(body_text(resp).await, "");
        assert_eq!(state.registry.state("r1"), None);
    }

    #[tokio::test]
    async fn test_healthz_reports_registry_counts() {
        let state = test_state();
        state.registry.push("pending-run", "node_update", Payload::new());
        let _stream = get(&state, "/runs/active-run/events").await;

        let resp = get(&state, "/healthz").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({"status": "ok", "pending_runs": 1, "active_runs": 1})
        );
    }
}
