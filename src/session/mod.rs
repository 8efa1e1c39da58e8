//! Capture session management
//!
//! This module provides the `CaptureController` state machine that owns:
//! - Stream acquisition (microphone + active tab)
//! - The audio graph and its two buses
//! - The chunked recorder and the submit loop
//! - The transcription log, session statistics, and UI events

mod config;
mod controller;
mod events;
mod stats;

pub use config::{CaptureMode, SessionConfig};
pub use controller::{CaptureController, CaptureState, ControlError};
pub use events::{EventBus, MetricDisplay, PipelineEvent};
pub use stats::{SessionStats, TranscriptEntry, TranscriptionLog};
