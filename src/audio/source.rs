use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::tabs::{TabInfo, TabRegistry};

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Audio output of the active browser tab
    Tab,
    /// Microphone input
    Microphone,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Which source produced this frame
    pub source: SourceKind,
}

/// Microphone acquisition constraints, mirroring what the capture host
/// applies at the device level.
#[derive(Debug, Clone)]
pub struct MicConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: false,
            channel_count: 1,
        }
    }
}

/// Errors raised while acquiring a live audio source.
///
/// `PermissionDenied` and `DeviceUnavailable` cover the microphone path;
/// `NoActiveTab` and `CaptureDenied` cover the tab path. All four are fatal
/// to starting a capture session.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no active tab in the current window")]
    NoActiveTab,

    #[error("tab capture denied: {0}")]
    CaptureDenied(String),
}

/// A running capture backend for one audio source.
///
/// Platform-specific implementations:
/// - Microphone: cpal input stream (all platforms)
/// - Tab: provided by the browser-side capture host at deployment time
#[async_trait::async_trait]
pub trait SourceBackend: Send + Sync {
    /// Start capturing. Returns a channel receiver of audio frames.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AcquireError>;

    /// Stop capturing and release the underlying device or tab stream.
    async fn stop(&mut self) -> Result<()>;

    /// Whether the backend is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Source kind this backend captures.
    fn kind(&self) -> SourceKind;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Creates capture backends for the two source kinds.
///
/// The controller only talks to this trait, so tests (and the browser-side
/// capture host) can substitute their own backends.
#[async_trait::async_trait]
pub trait SourceBackendFactory: Send + Sync {
    async fn microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn SourceBackend>, AcquireError>;

    async fn tab_audio(&self, tab: &TabInfo) -> Result<Box<dyn SourceBackend>, AcquireError>;
}

/// An acquired live source: the running backend plus its release guard.
///
/// Invariant: the underlying stream is stopped exactly once per acquisition.
/// `release` is idempotent; dropping an unreleased handle logs a leak
/// warning because the device stays held until the backend is dropped.
pub struct SourceHandle {
    kind: SourceKind,
    backend: Box<dyn SourceBackend>,
    released: bool,
}

impl SourceHandle {
    fn new(backend: Box<dyn SourceBackend>) -> Self {
        Self {
            kind: backend.kind(),
            backend,
            released: false,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop the underlying stream. Safe to call on every exit path; the
    /// second and later calls are no-ops.
    pub async fn release(&mut self) {
        if self.released {
            warn!("{:?} handle already released, ignoring", self.kind);
            return;
        }
        self.released = true;

        if let Err(e) = self.backend.stop().await {
            warn!("Failed to stop {:?} backend: {}", self.kind, e);
        } else {
            info!("Released {:?} stream", self.kind);
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "{:?} handle dropped without release; stream may stay live",
                self.kind
            );
        }
    }
}

/// Acquires the two live sources a capture session needs.
pub struct StreamAcquirer {
    factory: Arc<dyn SourceBackendFactory>,
}

impl StreamAcquirer {
    pub fn new(factory: Arc<dyn SourceBackendFactory>) -> Self {
        Self { factory }
    }

    /// Acquire the microphone.
    ///
    /// Probes permission first with a throwaway open-and-release cycle;
    /// requesting the device twice in one session is unreliable on some
    /// platforms unless permission has already been granted.
    pub async fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<(SourceHandle, mpsc::Receiver<AudioFrame>), AcquireError> {
        let mut probe = self.factory.microphone(constraints).await?;
        let _probe_rx = probe.start().await?;
        probe
            .stop()
            .await
            .map_err(|e| AcquireError::DeviceUnavailable(e.to_string()))?;
        drop(probe);
        info!("Microphone permission probe succeeded");

        let mut backend = self.factory.microphone(constraints).await?;
        let rx = backend.start().await?;
        info!("Microphone stream acquired via {}", backend.name());

        Ok((SourceHandle::new(backend), rx))
    }

    /// Acquire the audio of the currently active tab.
    ///
    /// Fails with `NoActiveTab` when the registry has no active tab in the
    /// current window.
    pub async fn acquire_tab_audio(
        &self,
        tabs: &TabRegistry,
    ) -> Result<(SourceHandle, mpsc::Receiver<AudioFrame>), AcquireError> {
        let tab = tabs.active_tab().ok_or(AcquireError::NoActiveTab)?;

        let mut backend = self.factory.tab_audio(&tab).await?;
        let rx = backend.start().await?;
        info!("Tab audio stream acquired for tab {} ({})", tab.id, tab.title);

        Ok((SourceHandle::new(backend), rx))
    }
}

/// Default factory wiring the cpal microphone backend.
///
/// Tab audio is extension-privileged: the browser-side capture host attaches
/// its own `SourceBackendFactory` in deployment, so the device factory
/// refuses tab requests rather than pretending to capture.
pub struct DeviceBackendFactory {
    /// Buffer size for microphone frames in milliseconds.
    pub mic_buffer_ms: u64,
    /// Sample rate the pipeline expects; the mic backend downsamples to it.
    pub sample_rate: u32,
}

impl Default for DeviceBackendFactory {
    fn default() -> Self {
        Self {
            mic_buffer_ms: 100,
            sample_rate: 48000,
        }
    }
}

#[async_trait::async_trait]
impl SourceBackendFactory for DeviceBackendFactory {
    async fn microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn SourceBackend>, AcquireError> {
        let backend = super::mic::CpalMicBackend::new(
            constraints.clone(),
            self.sample_rate,
            self.mic_buffer_ms,
        );
        Ok(Box::new(backend))
    }

    async fn tab_audio(&self, tab: &TabInfo) -> Result<Box<dyn SourceBackend>, AcquireError> {
        Err(AcquireError::CaptureDenied(format!(
            "no capture host attached for tab {}",
            tab.id
        )))
    }
}
