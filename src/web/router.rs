//! Web application router and middleware setup.

use crate::error::{Result, SystemError};
use crate::web::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the axum application with all routes and middleware.
pub fn create_app(state: AppState) -> Result<Router> {
    let config = state.config.clone();
    if config.max_stream_sessions == 0 {
        return Err(SystemError::config_error("max_stream_sessions must be at least 1"));
    }
    if config.default_interval_ms == 0 {
        return Err(SystemError::config_error("default interval must be greater than zero"));
    }

    let mut app = Router::new()
        .route("/api/snapshot", get(handlers::get_snapshot))
        .route("/api/stream", get(handlers::stream_snapshots))
        .route("/api/health", get(handlers::health_check))
        .route("/api/shutdown", post(handlers::shutdown))
        .with_state(state);

    // Add middleware layers
    let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());

    // Add CORS if enabled
    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app = app.layer(service_builder);

    Ok(app)
}
