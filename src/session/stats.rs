use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Statistics about a capture session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Whether capture is currently active.
    pub is_recording: bool,

    /// Locally generated id of the current (or last) capture. Distinct from
    /// the backend-issued session id, which may not exist in single-shot mode.
    pub capture_id: Option<String>,

    /// When the current (or last) capture started.
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed capture time in seconds.
    pub duration_secs: f64,

    /// Chunks accepted by the analysis backend.
    pub chunks_submitted: usize,

    /// Chunks whose submission failed and was dropped from analysis.
    pub chunks_failed: usize,

    /// Transcription entries accumulated so far.
    pub transcript_entries: usize,
}

/// One per-chunk transcription returned by the backend.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub sequence_index: u64,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Append-only, single-writer transcription log for one session.
#[derive(Default)]
pub struct TranscriptionLog {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptionLog {
    pub async fn append(&self, sequence_index: u64, text: String) {
        let mut entries = self.entries.lock().await;
        entries.push(TranscriptEntry {
            sequence_index,
            text,
            received_at: Utc::now(),
        });
    }

    pub async fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
