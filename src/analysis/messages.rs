use serde::{Deserialize, Serialize};

/// Response to `POST /start-session`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

/// Per-chunk analysis returned by `POST /process-chunk/{session_id}`
/// and `POST /process-mc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    /// Coaching advice text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consejo: Option<String>,
    /// Call-management score, 0 to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manejo: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `POST /end-session/{session_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_consejo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_manejo: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Color band for the management score display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreBand {
    Low,
    Mid,
    High,
}

impl ScoreBand {
    pub fn classify(score: u8) -> Self {
        match score {
            0..=29 => ScoreBand::Low,
            30..=50 => ScoreBand::Mid,
            _ => ScoreBand::High,
        }
    }
}

/// Render a management score for display.
pub fn format_percentage(score: u8) -> String {
    format!("{score}%")
}
