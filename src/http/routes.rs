use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Capture control
        .route("/capture/start", post(handlers::start_capture))
        .route("/capture/stop", post(handlers::stop_capture))
        // Session queries
        .route("/capture/status", get(handlers::get_status))
        .route("/capture/transcript", get(handlers::get_transcript))
        // Tab reports from the browser-side capture host
        .route("/tabs", post(handlers::report_tab))
        .route("/tabs/:id/activate", post(handlers::activate_tab))
        .route("/tabs/:id", delete(handlers::remove_tab))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
