use crate::audio::TabRegistry;
use crate::session::CaptureController;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single capture controller (one active session at a time)
    pub controller: Arc<CaptureController>,
    /// Tab bookkeeping fed by the browser-side capture host
    pub tabs: Arc<TabRegistry>,
}

impl AppState {
    pub fn new(controller: Arc<CaptureController>, tabs: Arc<TabRegistry>) -> Self {
        Self { controller, tabs }
    }
}
