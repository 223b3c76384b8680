//! Web server and streaming endpoints for the Slice of Pi telemetry service.
//!
//! This module serves one-shot snapshots over REST and live snapshot streams
//! as Server-Sent Events, one independent session per connected client.

pub mod config;
pub mod event;
pub mod handlers;
pub mod router;
pub mod session;

// Re-export commonly used items
pub use config::WebConfig;
pub use event::StreamEvent;
pub use handlers::AppState;
pub use router::create_app;
pub use session::{open_session, SessionEvents, SessionHandle};

use crate::error::{Result, SystemError};
use crate::metrics::{CommandRunner, Sampler, SamplerConfig, SystemCommandRunner};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Start the web server with the provided configuration.
///
/// Every stream session gets its own [`Sampler`] built from `sampler_config`.
pub async fn start_web_server(config: WebConfig, sampler_config: SamplerConfig) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let sources = Sampler::factory(sampler_config, runner.clone());
    let state = AppState::new(config.clone(), sources, runner);
    let app = create_app(state)?;

    // Parse the bind address
    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| SystemError::config_error(format!("Invalid bind address: {}", e)))?;

    info!("Starting Slice of Pi server on http://{}", addr);
    info!("Snapshot endpoint: http://{}/api/snapshot", addr);
    info!(
        "Stream endpoint: http://{}/api/stream?interval={}",
        addr, config.default_interval_ms
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SystemError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    // Run the server
    axum::serve(listener, app)
        .await
        .map_err(|e| SystemError::web_server_error(format!("Server error: {}", e)))?;

    Ok(())
}
