//! HTTP handlers for API endpoints.

use crate::metrics::{CommandRunner, SourceFactory};
use crate::web::config::WebConfig;
use crate::web::session::open_session;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Shared, read-only application state.
///
/// Nothing in here is mutated per session: each stream gets a fresh source
/// from the factory, and the semaphore only counts open sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WebConfig>,
    pub sources: Arc<dyn SourceFactory>,
    pub runner: Arc<dyn CommandRunner>,
    pub sessions: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: WebConfig,
        sources: Arc<dyn SourceFactory>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let sessions = Arc::new(Semaphore::new(config.max_stream_sessions));
        Self {
            config: Arc::new(config),
            sources,
            runner,
            sessions,
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Query parameters of the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Cadence in milliseconds
    pub interval: Option<u64>,
}

/// Get one system snapshot as JSON.
pub async fn get_snapshot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut source = state.sources.create();

    match source.sample().await {
        Ok(snapshot) => match serde_json::to_value(&snapshot) {
            Ok(json_value) => Ok(Json(json_value)),
            Err(e) => {
                error!("Failed to serialize snapshot: {}", e);
                Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serialize system data"))
            }
        },
        Err(e) => {
            error!("Failed to collect snapshot: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch system data"))
        }
    }
}

/// Open a live snapshot stream as Server-Sent Events.
pub async fn stream_snapshots(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let cadence = state
        .config
        .cadence(params.interval)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "interval must be greater than zero"))?;

    let permit = state.sessions.clone().try_acquire_owned().map_err(|_| {
        warn!("Rejecting stream: session limit reached");
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Too many open streams")
    })?;

    let (events, _handle) = open_session(state.sources.create(), cadence).map_err(|e| {
        error!("Failed to open stream session: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    info!(session_id = %events.id(), cadence_ms = cadence.as_millis() as u64, "Stream client connected");

    let events = events
        .with_permit(permit)
        .map(|event| Event::default().json_data(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let open_streams = state.config.max_stream_sessions - state.sessions.available_permits();
    Json(json!({
        "status": "ok",
        "service": "slice-of-pi",
        "version": env!("CARGO_PKG_VERSION"),
        "open_streams": open_streams,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Power off the host.
///
/// Only same-origin requests are honored: a present `Origin` header must
/// contain the `Host` header value.
pub async fn shutdown(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !state.config.enable_shutdown {
        return api_error(StatusCode::NOT_FOUND, "Shutdown is disabled");
    }

    if !is_same_origin(&headers) {
        warn!("Rejected shutdown request from foreign origin");
        return api_error(StatusCode::FORBIDDEN, "Unauthorized origin");
    }

    warn!("Shutdown requested, powering off");
    match state.runner.run("sudo", &["shutdown", "-h", "now"]).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Raspberry Pi is shutting down..."
            })),
        ),
        Err(e) => {
            error!("Shutdown failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to shutdown system",
                    "details": e.to_string()
                })),
            )
        }
    }
}

fn is_same_origin(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let Some(host) = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
    else {
        return false;
    };
    origin
        .to_str()
        .map(|origin| origin.contains(host))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(origin: Option<&'static str>, host: Option<&'static str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(origin) = origin {
            map.insert(header::ORIGIN, HeaderValue::from_static(origin));
        }
        if let Some(host) = host {
            map.insert(header::HOST, HeaderValue::from_static(host));
        }
        map
    }

    #[test]
    fn test_same_origin_check() {
        assert!(is_same_origin(&headers(None, Some("pi.local:8080"))));
        assert!(is_same_origin(&headers(
            Some("http://pi.local:8080"),
            Some("pi.local:8080")
        )));
        assert!(!is_same_origin(&headers(
            Some("http://evil.example"),
            Some("pi.local:8080")
        )));
        assert!(!is_same_origin(&headers(Some("http://pi.local:8080"), None)));
    }
}
