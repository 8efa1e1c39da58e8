//! HTTP API server for external control (side-panel UI)
//!
//! This module provides a REST API for controlling the capture pipeline:
//! - POST /capture/start - Start capturing
//! - POST /capture/stop - Stop capturing
//! - GET /capture/status - Query session statistics
//! - GET /capture/transcript - Get accumulated transcription log
//! - POST /tabs, /tabs/{id}/activate, DELETE /tabs/{id} - Tab reports
//!   from the browser-side capture host
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
