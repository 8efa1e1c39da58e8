//! HTTP client for the remote analysis backend.
//!
//! Endpoints:
//! - POST /start-session
//! - POST /process-chunk/{session_id}  (multipart field `file`)
//! - POST /end-session/{session_id}
//! - POST /process-mc                  (multipart field `file`, single-shot)
//!
//! Any non-2xx status or a present `error` field counts as failure.

use reqwest::multipart::{Form, Part};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::messages::{ChunkAnalysis, SessionSummary, StartSessionResponse};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error talking to analysis backend: {0}")]
    Network(#[from] reqwest::Error),

    #[error("analysis backend returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("analysis backend rejected request: {0}")]
    Rejected(String),
}

/// Session lifecycle and chunk submission against the analysis backend.
///
/// The pipeline only depends on this trait; tests substitute in-memory
/// fakes, deployment uses [`HttpSessionClient`].
#[async_trait::async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Open a server-side analysis session; returns its opaque id.
    async fn start_session(&self) -> Result<String, BackendError>;

    /// Submit one encoded chunk for incremental analysis.
    async fn submit_chunk(
        &self,
        session_id: &str,
        wav_bytes: Vec<u8>,
        sequence_index: u64,
    ) -> Result<ChunkAnalysis, BackendError>;

    /// Close the session and fetch the aggregate summary.
    async fn end_session(&self, session_id: &str) -> Result<SessionSummary, BackendError>;

    /// Analyze one complete recording without a session (single-shot mode).
    async fn process_single(&self, wav_bytes: Vec<u8>) -> Result<ChunkAnalysis, BackendError>;
}

pub struct HttpSessionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn audio_form(wav_bytes: Vec<u8>, file_name: String) -> Result<Form, BackendError> {
        let part = Part::bytes(wav_bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        Ok(Form::new().part("file", part))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn ensure_no_error_field(error: Option<String>) -> Result<(), BackendError> {
    match error {
        Some(message) => Err(BackendError::Rejected(message)),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for HttpSessionClient {
    async fn start_session(&self) -> Result<String, BackendError> {
        let response = self
            .client
            .post(format!("{}/start-session", self.base_url))
            .send()
            .await?;

        let body: StartSessionResponse = ensure_success(response).await?.json().await?;
        info!("Analysis session started: {}", body.session_id);
        Ok(body.session_id)
    }

    async fn submit_chunk(
        &self,
        session_id: &str,
        wav_bytes: Vec<u8>,
        sequence_index: u64,
    ) -> Result<ChunkAnalysis, BackendError> {
        let byte_count = wav_bytes.len();
        let form = Self::audio_form(wav_bytes, format!("chunk-{sequence_index:05}.wav"))?;

        let response = self
            .client
            .post(format!("{}/process-chunk/{}", self.base_url, session_id))
            .multipart(form)
            .send()
            .await?;

        let analysis: ChunkAnalysis = ensure_success(response).await?.json().await?;
        ensure_no_error_field(analysis.error.clone())?;

        debug!(
            "Chunk {} submitted ({} bytes, manejo={:?})",
            sequence_index, byte_count, analysis.manejo
        );
        Ok(analysis)
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionSummary, BackendError> {
        let response = self
            .client
            .post(format!("{}/end-session/{}", self.base_url, session_id))
            .send()
            .await?;

        let summary: SessionSummary = ensure_success(response).await?.json().await?;
        ensure_no_error_field(summary.error.clone())?;

        info!("Analysis session ended: {}", session_id);
        Ok(summary)
    }

    async fn process_single(&self, wav_bytes: Vec<u8>) -> Result<ChunkAnalysis, BackendError> {
        let form = Self::audio_form(wav_bytes, "recording.wav".to_string())?;

        let response = self
            .client
            .post(format!("{}/process-mc", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let analysis: ChunkAnalysis = ensure_success(response).await?.json().await?;
        ensure_no_error_field(analysis.error.clone())?;
        Ok(analysis)
    }
}
