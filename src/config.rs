use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{CaptureMode, SessionConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_duration_secs: u64,
    pub tab_gain: f32,
    pub mic_gain: f32,
    /// Directory for locally saved recordings. Omit to disable saving.
    pub recordings_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.session_config().validate()?;
        Ok(cfg)
    }

    /// Map the file configuration onto a capture session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: CaptureMode::Chunked,
            chunk_duration: Duration::from_secs(self.audio.chunk_duration_secs),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            tab_gain: self.audio.tab_gain,
            mic_gain: self.audio.mic_gain,
            save_dir: self.audio.recordings_path.as_ref().map(PathBuf::from),
            ..SessionConfig::default()
        }
    }
}
