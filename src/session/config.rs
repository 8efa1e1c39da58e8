use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::MicConstraints;

/// Capture mode: one pipeline, two submission shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Whole recording submitted once at stop (`/process-mc`).
    SingleShot,
    /// Fixed-duration chunks submitted against a server session.
    Chunked,
}

/// Configuration for a capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: CaptureMode,

    /// Interval between chunk boundaries (chunked mode).
    pub chunk_duration: Duration,

    /// Sample rate shared by every node in the audio graph.
    pub sample_rate: u32,

    /// Channel count of the mixed signal (1 = mono).
    pub channels: u16,

    /// Tab chain output gain.
    pub tab_gain: f32,

    /// Mic chain output gain.
    pub mic_gain: f32,

    pub mic_constraints: MicConstraints,

    /// Directory for locally saved recordings, if any.
    pub save_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Chunked,
            chunk_duration: Duration::from_secs(10),
            sample_rate: 48000,
            channels: 1,
            tab_gain: 0.7,
            mic_gain: 1.0,
            mic_constraints: MicConstraints::default(),
            save_dir: None,
        }
    }
}

impl SessionConfig {
    /// Reject configurations the graph cannot honor. A single consistent
    /// sample rate across all nodes is enforced here.
    pub fn validate(&self) -> Result<()> {
        const SUPPORTED_RATES: [u32; 3] = [16000, 44100, 48000];

        if !SUPPORTED_RATES.contains(&self.sample_rate) {
            bail!(
                "unsupported sample rate {} (supported: {:?})",
                self.sample_rate,
                SUPPORTED_RATES
            );
        }
        if self.channels == 0 || self.channels > 2 {
            bail!("channel count must be 1 or 2, got {}", self.channels);
        }
        if self.chunk_duration < Duration::from_secs(1) {
            bail!("chunk duration must be at least 1 second");
        }
        for (name, gain) in [("tab_gain", self.tab_gain), ("mic_gain", self.mic_gain)] {
            if !gain.is_finite() || gain <= 0.0 || gain > 2.0 {
                bail!("{} must be in (0.0, 2.0], got {}", name, gain);
            }
        }

        Ok(())
    }
}
