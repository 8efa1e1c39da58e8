//! Microphone capture backend built on cpal.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated worker
//! thread; the backend talks to it through a stop channel and receives
//! frames over a tokio mpsc channel.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::source::{AcquireError, AudioFrame, MicConstraints, SourceBackend, SourceKind};

const FRAME_CHANNEL_CAPACITY: usize = 64;

pub struct CpalMicBackend {
    constraints: MicConstraints,
    target_sample_rate: u32,
    buffer_ms: u64,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalMicBackend {
    pub fn new(constraints: MicConstraints, target_sample_rate: u32, buffer_ms: u64) -> Self {
        Self {
            constraints,
            target_sample_rate,
            buffer_ms,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl SourceBackend for CpalMicBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AcquireError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(AcquireError::DeviceUnavailable(
                "microphone backend already capturing".to_string(),
            ));
        }

        debug!(
            "Opening microphone (echo_cancellation={}, noise_suppression={}, auto_gain={}, channels={})",
            self.constraints.echo_cancellation,
            self.constraints.noise_suppression,
            self.constraints.auto_gain_control,
            self.constraints.channel_count,
        );

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let target_rate = self.target_sample_rate;
        let buffer_ms = self.buffer_ms;
        let downmix = self.constraints.channel_count == 1;

        let worker = std::thread::spawn(move || {
            run_capture_thread(frame_tx, ready_tx, stop_rx, target_rate, buffer_ms, downmix);
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = worker.join();
                return Err(classify_device_error(msg));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(AcquireError::DeviceUnavailable(
                    "microphone worker exited before reporting readiness".to_string(),
                ));
            }
        }

        self.capturing.store(true, Ordering::SeqCst);
        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);

        info!("Microphone capture started ({}Hz target)", target_rate);
        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            warn!("Microphone backend not capturing");
            return Ok(());
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.join())
                .await
                .context("join task failed")?
                .map_err(|_| anyhow::anyhow!("microphone worker panicked"))?;
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Microphone
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

fn run_capture_thread(
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), String>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    target_rate: u32,
    buffer_ms: u64,
    downmix: bool,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err("no input device found on the default audio host".into()));
        return;
    };

    let supported = match device.default_input_config() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to query default input config: {e}")));
            return;
        }
    };

    let native_rate = supported.sample_rate().0;
    let native_channels = supported.channels();
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let mut assembler = FrameAssembler::new(native_rate, native_channels, target_rate, buffer_ms, downmix);

    let err_fn = |e| warn!("Microphone stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let pcm: Vec<i16> = data
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                assembler.push(&pcm, &frame_tx);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                assembler.push(data, &frame_tx);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(format!("unsupported input sample format: {other:?}")));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to build input stream: {e}")));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start audio stream: {e}")));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Block until stop is requested; dropping the stream stops capture.
    let _ = stop_rx.recv();
    drop(stream);
}

/// Accumulates raw device samples into fixed-duration frames, downmixing
/// and decimating to the pipeline's target format before sending.
struct FrameAssembler {
    buf: Vec<i16>,
    native_rate: u32,
    native_channels: u16,
    target_rate: u32,
    buffer_ms: u64,
    downmix: bool,
    frames_emitted: u64,
}

impl FrameAssembler {
    fn new(native_rate: u32, native_channels: u16, target_rate: u32, buffer_ms: u64, downmix: bool) -> Self {
        Self {
            buf: Vec::new(),
            native_rate,
            native_channels,
            target_rate,
            buffer_ms,
            downmix,
            frames_emitted: 0,
        }
    }

    fn native_frame_len(&self) -> usize {
        (self.native_rate as u64 * self.native_channels as u64 * self.buffer_ms / 1000) as usize
    }

    fn push(&mut self, samples: &[i16], tx: &mpsc::Sender<AudioFrame>) {
        self.buf.extend_from_slice(samples);

        let frame_len = self.native_frame_len();
        while self.buf.len() >= frame_len {
            let raw: Vec<i16> = self.buf.drain(..frame_len).collect();

            let (mono, channels) = if self.downmix && self.native_channels == 2 {
                (stereo_to_mono(&raw), 1)
            } else {
                (raw, self.native_channels)
            };

            let (out, rate) = downsample(&mono, self.native_rate, self.target_rate);

            let frame = AudioFrame {
                samples: out,
                sample_rate: rate,
                channels,
                timestamp_ms: self.frames_emitted * self.buffer_ms,
                source: SourceKind::Microphone,
            };
            self.frames_emitted += 1;

            if tx.try_send(frame).is_err() {
                debug!("Microphone frame dropped: consumer is behind");
            }
        }
    }
}

/// Sum left and right channels with clipping.
fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|pair| {
            let sum = pair[0] as i32 + pair[1] as i32;
            sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect()
}

/// Decimate to the target rate when the ratio is integral; otherwise the
/// samples pass through at the native rate and the graph flags the mismatch.
fn downsample(samples: &[i16], native_rate: u32, target_rate: u32) -> (Vec<i16>, u32) {
    if native_rate == target_rate || target_rate == 0 || native_rate % target_rate != 0 {
        return (samples.to_vec(), native_rate);
    }

    let ratio = (native_rate / target_rate) as usize;
    let out: Vec<i16> = samples.iter().step_by(ratio).copied().collect();
    (out, target_rate)
}

fn classify_device_error(msg: String) -> AcquireError {
    let lower = msg.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not permitted") {
        AcquireError::PermissionDenied(msg)
    } else {
        AcquireError::DeviceUnavailable(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_to_mono_sums_channels() {
        let samples = vec![100, 50, 200, 100, 300, 150];
        let mono = stereo_to_mono(&samples);

        assert_eq!(mono, vec![150, 300, 450]);
    }

    #[test]
    fn test_stereo_to_mono_clips() {
        let samples = vec![i16::MAX, 1000];
        let mono = stereo_to_mono(&samples);

        assert_eq!(mono, vec![i16::MAX]);
    }

    #[test]
    fn test_downsample_integral_ratio() {
        let samples: Vec<i16> = (0..96).collect();
        let (out, rate) = downsample(&samples, 96000, 48000);

        assert_eq!(rate, 48000);
        assert_eq!(out.len(), 48);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 2);
    }

    #[test]
    fn test_downsample_non_integral_ratio_passes_through() {
        let samples: Vec<i16> = (0..100).collect();
        let (out, rate) = downsample(&samples, 44100, 48000);

        assert_eq!(rate, 44100);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_classify_permission_errors() {
        assert!(matches!(
            classify_device_error("access denied by the OS".into()),
            AcquireError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_device_error("device disconnected".into()),
            AcquireError::DeviceUnavailable(_)
        ));
    }
}
