//! HTTP delivery layer: the screenshot endpoint, health and metrics probes,
//! and static hosting for the dashboard SPA.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::capture::Renderer;
use crate::{adapt, AdaptOptions, Error, RenderRequest};

/// Prometheus exposition content type (version 0.0.4 text format).
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Per-process metrics registry.
pub struct Metrics {
    registry: Registry,
    pub screenshot_requests: IntCounter,
    pub screenshot_failures: IntCounter,
    pub render_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let screenshot_requests = IntCounter::new(
            "screenshot_requests_total",
            "Screenshot requests received",
        )
        .expect("valid metric definition");
        let screenshot_failures = IntCounter::new(
            "screenshot_failures_total",
            "Screenshot requests that failed in any stage",
        )
        .expect("valid metric definition");
        let render_seconds = Histogram::with_opts(HistogramOpts::new(
            "screenshot_render_seconds",
            "Wall time of the browser capture stage",
        ))
        .expect("valid metric definition");

        registry
            .register(Box::new(screenshot_requests.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(screenshot_failures.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(render_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            screenshot_requests,
            screenshot_failures,
            render_seconds,
        }
    }

    fn encode(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub renderer: Arc<dyn Renderer>,
    pub metrics: Arc<Metrics>,
}

/// Build the application router.
///
/// When `static_dir` is given, every path not claimed by the API serves the
/// prebuilt SPA from it, falling back to its `index.html` for client-routed
/// paths.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/api/screenshot", get(screenshot))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state);

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        router = router.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index)));
    }

    router.layer(TraceLayer::new_for_http())
}

/// Query parameters of `GET /api/screenshot`.
#[derive(Debug, Deserialize)]
pub struct ScreenshotParams {
    width: u32,
    height: u32,
    lat: f64,
    long: f64,
    name: Option<String>,
    #[serde(default = "default_color")]
    color: f32,
    #[serde(default = "default_brightness")]
    brightness: f32,
    #[serde(default)]
    quantize: bool,
    black: Option<u8>,
}

fn default_color() -> f32 {
    1.2
}

fn default_brightness() -> f32 {
    1.0
}

async fn screenshot(
    State(state): State<AppState>,
    params: Result<Query<ScreenshotParams>, QueryRejection>,
) -> Response {
    // Missing or non-numeric required parameters surface as a validation
    // error, not a server failure.
    let Query(params) = match params {
        Ok(query) => query,
        Err(rejection) => return validation_error(rejection.body_text()),
    };

    let request = RenderRequest {
        width: params.width,
        height: params.height,
        latitude: params.lat,
        longitude: params.long,
        name: params.name,
    };
    if let Err(e) = request.validate() {
        return validation_error(e.to_string());
    }

    let options = AdaptOptions {
        color_factor: params.color,
        brightness_factor: params.brightness,
        quantize: params.quantize,
        black_floor: params.black,
    };
    if let Err(e) = options.validate() {
        return validation_error(e.to_string());
    }

    state.metrics.screenshot_requests.inc();

    // The capture is synchronous browser work; keep it off the event loop so
    // concurrent renders make progress independently.
    let renderer = state.renderer.clone();
    let capture_request = request.clone();
    let started = Instant::now();
    let raw = match tokio::task::spawn_blocking(move || renderer.capture(&capture_request)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => return stage_error(&state, err),
        Err(join_err) => {
            return stage_error(
                &state,
                Error::RenderFailed(format!("render task aborted: {}", join_err)),
            )
        }
    };
    state
        .metrics
        .render_seconds
        .observe(started.elapsed().as_secs_f64());

    // Quantization is CPU-bound; it gets the same treatment.
    let adapted = match tokio::task::spawn_blocking(move || adapt::process(&raw, &options)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => return stage_error(&state, err),
        Err(join_err) => {
            return stage_error(
                &state,
                Error::AdaptFailed(format!("adapt task aborted: {}", join_err)),
            )
        }
    };

    ([(header::CONTENT_TYPE, "image/png")], adapted).into_response()
}

/// Every stage failure collapses to one 500 shape at this boundary; callers
/// only see the message text. The enum kind still drives the server log.
fn stage_error(state: &AppState, err: Error) -> Response {
    state.metrics.screenshot_failures.inc();
    match &err {
        Error::RenderFailed(msg) => error!(stage = "render", error = %msg, "screenshot failed"),
        Error::DecodeFailed(msg) => error!(stage = "decode", error = %msg, "screenshot failed"),
        Error::AdaptFailed(msg) => error!(stage = "adapt", error = %msg, "screenshot failed"),
        Error::ConfigError(msg) => error!(stage = "config", error = %msg, "screenshot failed"),
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": err.to_string() })),
    )
        .into_response()
}

fn validation_error(detail: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.encode(),
    )
        .into_response()
}
