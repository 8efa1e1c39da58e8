use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{CaptureMode, SessionConfig};
use super::events::{EventBus, MetricDisplay, PipelineEvent};
use super::stats::{SessionStats, TranscriptEntry, TranscriptionLog};
use crate::analysis::{AnalysisBackend, BackendError, SessionSummary};
use crate::audio::{
    AcquireError, AudioFrame, ChunkedRecorder, EncodedChunk, GraphBuilder, GraphConfig, MixBus,
    MonitorSink, RecorderConfig, SourceBackendFactory, SourceHandle, StreamAcquirer, TabRegistry,
};

/// Capture lifecycle states.
///
/// `Idle -> Requesting -> Capturing -> Stopping -> Idle`, with any fatal
/// error during `Requesting` unwinding straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Capturing,
    Stopping,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("stop requested while capture setup is in progress")]
    StopWhileRequesting,

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),

    #[error("capture setup failed: {0}")]
    Setup(String),
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    failed: AtomicUsize,
}

/// Everything owned by one running capture: the acquired sources and the
/// pipeline tasks wired between them.
struct ActiveCapture {
    session_id: Option<String>,
    mic: SourceHandle,
    tab: SourceHandle,
    graph_task: JoinHandle<anyhow::Result<crate::audio::GraphStats>>,
    recorder_task: JoinHandle<anyhow::Result<crate::audio::RecorderStats>>,
    submit_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

/// Top-level coordinator of the capture pipeline.
///
/// Owns the session state machine and every resource of the active capture.
/// At most one capture runs at a time; `start()` while not idle is a no-op.
pub struct CaptureController {
    config: SessionConfig,
    backend: Arc<dyn AnalysisBackend>,
    factory: Arc<dyn SourceBackendFactory>,
    tabs: Arc<TabRegistry>,
    monitor: Arc<dyn MonitorSink>,
    events: EventBus,
    state: Mutex<CaptureState>,
    active: AsyncMutex<Option<ActiveCapture>>,
    transcript: Arc<TranscriptionLog>,
    counters: Arc<Counters>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    capture_id: Mutex<Option<String>>,
    last_summary: Mutex<Option<SessionSummary>>,
}

impl CaptureController {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AnalysisBackend>,
        factory: Arc<dyn SourceBackendFactory>,
        tabs: Arc<TabRegistry>,
        monitor: Arc<dyn MonitorSink>,
    ) -> Self {
        Self {
            config,
            backend,
            factory,
            tabs,
            monitor,
            events: EventBus::default(),
            state: Mutex::new(CaptureState::Idle),
            active: AsyncMutex::new(None),
            transcript: Arc::new(TranscriptionLog::default()),
            counters: Arc::new(Counters::default()),
            started_at: Mutex::new(None),
            capture_id: Mutex::new(None),
            last_summary: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.snapshot().await
    }

    pub fn last_summary(&self) -> Option<SessionSummary> {
        self.last_summary.lock().expect("summary lock poisoned").clone()
    }

    /// Forward active-tab changes from the registry to event subscribers.
    pub fn watch_tabs(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        let mut rx = self.tabs.watch();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let tab = rx.borrow_and_update().clone();
                events.emit(PipelineEvent::TabSelectionChanged { tab });
            }
        })
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock().expect("state lock poisoned") = state;
        self.events.emit(PipelineEvent::StateChanged(state));
    }

    /// Start capturing.
    ///
    /// No-op when a capture is already requesting, running, or stopping.
    /// The server session is opened before any audio resource is acquired;
    /// a refused session leaves the machine idle with nothing to unwind.
    pub async fn start(&self) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != CaptureState::Idle {
                info!("start() ignored: capture is {:?}", *state);
                return Ok(());
            }
            *state = CaptureState::Requesting;
        }
        self.events.emit(PipelineEvent::StateChanged(CaptureState::Requesting));

        self.transcript.clear().await;
        self.counters.submitted.store(0, Ordering::SeqCst);
        self.counters.failed.store(0, Ordering::SeqCst);
        *self.last_summary.lock().expect("summary lock poisoned") = None;

        match self.start_inner().await {
            Ok(active) => {
                let capture_id = format!("capture-{}", uuid::Uuid::new_v4());
                info!("Capture started ({})", capture_id);
                *self.active.lock().await = Some(active);
                *self.started_at.lock().expect("start time lock poisoned") = Some(Utc::now());
                *self.capture_id.lock().expect("capture id lock poisoned") = Some(capture_id);
                self.set_state(CaptureState::Capturing);
                Ok(())
            }
            Err(e) => {
                self.set_state(CaptureState::Idle);
                error!("Capture start failed: {}", e);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<ActiveCapture, ControlError> {
        self.config
            .validate()
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))?;

        let session_id = match self.config.mode {
            CaptureMode::Chunked => Some(self.backend.start_session().await?),
            CaptureMode::SingleShot => None,
        };

        let acquirer = StreamAcquirer::new(Arc::clone(&self.factory));

        let (mut mic, mic_rx) = acquirer
            .acquire_microphone(&self.config.mic_constraints)
            .await?;

        let (mut tab, tab_rx) = match acquirer.acquire_tab_audio(&self.tabs).await {
            Ok(acquired) => acquired,
            Err(e) => {
                mic.release().await;
                return Err(e.into());
            }
        };

        let graph_config = GraphConfig {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            tab_gain: self.config.tab_gain,
            mic_gain: self.config.mic_gain,
            ..GraphConfig::default()
        };
        let MixBus {
            monitor_rx,
            capture_rx,
            task: graph_task,
        } = GraphBuilder::build(mic_rx, tab_rx, &graph_config);

        let recorder_config = RecorderConfig {
            chunk_duration: match self.config.mode {
                CaptureMode::Chunked => Some(self.config.chunk_duration),
                CaptureMode::SingleShot => None,
            },
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            save_dir: self.config.save_dir.clone(),
        };
        let recorder = match ChunkedRecorder::new(recorder_config) {
            Ok(r) => r,
            Err(e) => {
                mic.release().await;
                tab.release().await;
                return Err(ControlError::Setup(e.to_string()));
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let recorder_task = tokio::spawn(recorder.run(capture_rx, chunk_tx));

        let submit_task = tokio::spawn(submit_loop(
            Arc::clone(&self.backend),
            session_id.clone(),
            self.config.mode,
            chunk_rx,
            Arc::clone(&self.transcript),
            Arc::clone(&self.counters),
            self.events.clone(),
        ));

        let monitor_task = tokio::spawn(monitor_loop(monitor_rx, Arc::clone(&self.monitor)));
        let tick_task = tokio::spawn(tick_loop(self.events.clone()));

        Ok(ActiveCapture {
            session_id,
            mic,
            tab,
            graph_task,
            recorder_task,
            submit_task,
            monitor_task,
            tick_task,
        })
    }

    /// Stop capturing.
    ///
    /// Rejected while setup is still in progress; a no-op when idle. The
    /// end-session call is issued exactly once, strictly after the final
    /// chunk's submission attempt.
    pub async fn stop(&self) -> Result<SessionStats, ControlError> {
        let ignored = {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                CaptureState::Idle | CaptureState::Stopping => {
                    warn!("stop() ignored: capture is {:?}", *state);
                    true
                }
                CaptureState::Requesting => return Err(ControlError::StopWhileRequesting),
                CaptureState::Capturing => {
                    *state = CaptureState::Stopping;
                    false
                }
            }
        };
        if ignored {
            return Ok(self.stats().await);
        }
        self.events.emit(PipelineEvent::StateChanged(CaptureState::Stopping));
        info!("Stopping capture");

        let Some(mut active) = self.active.lock().await.take() else {
            self.set_state(CaptureState::Idle);
            return Ok(self.stats().await);
        };

        // Cancel the UI timer immediately.
        active.tick_task.abort();

        // Releasing the sources cascades down the pipeline: the graph
        // drains and closes the capture bus, the recorder flushes its
        // partial buffer as the final chunk, and the submit task finishes
        // after attempting that chunk.
        active.mic.release().await;
        active.tab.release().await;

        match active.graph_task.await {
            Ok(Ok(stats)) => debug!(
                "Audio graph done: {} mixed frames, {} dropped",
                stats.mixed_frames, stats.dropped_frames
            ),
            Ok(Err(e)) => error!("Audio graph failed: {:#}", e),
            Err(e) => error!("Audio graph task panicked: {}", e),
        }

        match active.recorder_task.await {
            Ok(Ok(stats)) => info!(
                "Recorder done: {} chunks, {} samples",
                stats.chunks_finalized, stats.samples_recorded
            ),
            Ok(Err(e)) => error!("Recorder failed: {:#}", e),
            Err(e) => error!("Recorder task panicked: {}", e),
        }

        if let Err(e) = active.submit_task.await {
            error!("Submit task panicked: {}", e);
        }
        if let Err(e) = active.monitor_task.await {
            if !e.is_cancelled() {
                error!("Monitor task panicked: {}", e);
            }
        }

        let mut end_error = None;
        if let Some(session_id) = &active.session_id {
            match self.backend.end_session(session_id).await {
                Ok(summary) => {
                    if summary.final_consejo.is_some() || summary.final_manejo.is_some() {
                        self.events.emit(PipelineEvent::MetricUpdated {
                            advice: summary.final_consejo.clone(),
                            management: summary.final_manejo.map(MetricDisplay::new),
                        });
                    }
                    *self.last_summary.lock().expect("summary lock poisoned") = Some(summary);
                }
                Err(e) => {
                    error!("Failed to end analysis session: {}", e);
                    end_error = Some(e);
                }
            }
        }

        self.set_state(CaptureState::Idle);
        info!("Capture stopped");

        match end_error {
            Some(e) => Err(e.into()),
            None => Ok(self.stats().await),
        }
    }

    /// Current session statistics.
    pub async fn stats(&self) -> SessionStats {
        let state = self.state();
        let started_at = *self.started_at.lock().expect("start time lock poisoned");
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let capture_id = self.capture_id.lock().expect("capture id lock poisoned").clone();

        SessionStats {
            is_recording: state == CaptureState::Capturing,
            capture_id,
            started_at,
            duration_secs,
            chunks_submitted: self.counters.submitted.load(Ordering::SeqCst),
            chunks_failed: self.counters.failed.load(Ordering::SeqCst),
            transcript_entries: self.transcript.len().await,
        }
    }
}

/// Submit finalized chunks until the recorder closes the channel.
///
/// A failed submission is logged and swallowed: the chunk drops out of the
/// analysis, the recording continues.
async fn submit_loop(
    backend: Arc<dyn AnalysisBackend>,
    session_id: Option<String>,
    mode: CaptureMode,
    mut chunk_rx: mpsc::Receiver<EncodedChunk>,
    transcript: Arc<TranscriptionLog>,
    counters: Arc<Counters>,
    events: EventBus,
) {
    while let Some(chunk) = chunk_rx.recv().await {
        let sequence_index = chunk.sequence_index;
        let result = match (mode, &session_id) {
            (CaptureMode::Chunked, Some(id)) => {
                backend
                    .submit_chunk(id, chunk.wav_bytes, sequence_index)
                    .await
            }
            _ => backend.process_single(chunk.wav_bytes).await,
        };

        match result {
            Ok(analysis) => {
                counters.submitted.fetch_add(1, Ordering::SeqCst);
                if let Some(text) = analysis.transcription {
                    transcript.append(sequence_index, text).await;
                }
                if analysis.consejo.is_some() || analysis.manejo.is_some() {
                    events.emit(PipelineEvent::MetricUpdated {
                        advice: analysis.consejo,
                        management: analysis.manejo.map(MetricDisplay::new),
                    });
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "Chunk {} submission failed, dropped from analysis: {}",
                    sequence_index, e
                );
            }
        }
    }
}

async fn monitor_loop(mut monitor_rx: mpsc::Receiver<AudioFrame>, sink: Arc<dyn MonitorSink>) {
    while let Some(frame) = monitor_rx.recv().await {
        if let Err(e) = sink.play(frame).await {
            warn!("Monitor playback error: {}", e);
        }
    }
}

/// Emit elapsed-time ticks every second until aborted.
async fn tick_loop(events: EventBus) {
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        events.emit(PipelineEvent::TimerTick {
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}
