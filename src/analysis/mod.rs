//! Client side of the remote analysis backend's HTTP contract.

mod client;
mod messages;

pub use client::{AnalysisBackend, BackendError, HttpSessionClient};
pub use messages::{format_percentage, ChunkAnalysis, ScoreBand, SessionSummary, StartSessionResponse};
