//! Chunked recorder for the capture bus.
//!
//! Accumulates capture-bus samples and, on a fixed wall-clock interval,
//! swaps the accumulation buffer for an empty one and hands it to the
//! finalize task. The finalize task encodes each buffer into a standalone
//! WAV file and forwards it in sequence order, so chunk N is dispatched
//! before the consumer ever observes chunk N+1 while accumulation of the
//! next interval continues undisturbed.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::source::AudioFrame;

const DEFAULT_CHUNK_DURATION: Duration = Duration::from_secs(10);

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Interval between chunk boundaries. `None` disables periodic
    /// boundaries: the whole recording becomes one final chunk (the
    /// single-shot capture mode).
    pub chunk_duration: Option<Duration>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Save every finalized chunk to this directory as
    /// `audio_<ISO8601>.wav`. `None` disables local saving.
    pub save_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Some(DEFAULT_CHUNK_DURATION),
            sample_rate: 48000,
            channels: 1,
            save_dir: None,
        }
    }
}

/// A finalized, playback-ready chunk.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Monotonically increasing, 0-based.
    pub sequence_index: u64,
    /// Complete WAV file contents.
    pub wav_bytes: Vec<u8>,
    pub sample_count: usize,
    /// Timestamp of the first frame in this chunk.
    pub start_ms: u64,
    /// Timestamp of the last frame in this chunk.
    pub end_ms: u64,
    /// True for the trailing partial chunk produced on stop.
    pub is_final: bool,
}

#[derive(Debug, Default, Clone)]
pub struct RecorderStats {
    pub chunks_finalized: u64,
    pub samples_recorded: usize,
}

/// Raw accumulation handed from the boundary loop to the finalize task.
struct RawChunk {
    sequence_index: u64,
    samples: Vec<i16>,
    start_ms: u64,
    end_ms: u64,
    is_final: bool,
}

#[derive(Default)]
struct Accumulation {
    samples: Vec<i16>,
    start_ms: Option<u64>,
    end_ms: u64,
}

impl Accumulation {
    fn push(&mut self, frame: &AudioFrame) {
        if self.start_ms.is_none() {
            self.start_ms = Some(frame.timestamp_ms);
        }
        self.end_ms = frame.timestamp_ms;
        self.samples.extend_from_slice(&frame.samples);
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Atomically swap the buffer out for an empty one.
    fn take(&mut self, sequence_index: u64, is_final: bool) -> RawChunk {
        let samples = std::mem::take(&mut self.samples);
        let start_ms = self.start_ms.take().unwrap_or(self.end_ms);
        RawChunk {
            sequence_index,
            samples,
            start_ms,
            end_ms: self.end_ms,
            is_final,
        }
    }
}

/// Slices the capture-bus stream into fixed-duration encoded chunks.
pub struct ChunkedRecorder {
    config: RecorderConfig,
}

impl ChunkedRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        if let Some(dir) = &config.save_dir {
            fs::create_dir_all(dir).context("Failed to create recordings directory")?;
        }

        info!(
            "Chunked recorder initialized ({})",
            match config.chunk_duration {
                Some(d) => format!("{}ms chunks", d.as_millis()),
                None => "single-shot".to_string(),
            }
        );

        Ok(Self { config })
    }

    /// Record until the capture bus closes.
    ///
    /// Boundaries fire strictly on the interval regardless of how long the
    /// consumer takes with earlier chunks. On input close, any partially
    /// accumulated buffer becomes a final shorter chunk; nothing is
    /// silently dropped on stop.
    pub async fn run(
        self,
        mut capture_rx: mpsc::Receiver<AudioFrame>,
        chunk_tx: mpsc::Sender<EncodedChunk>,
    ) -> Result<RecorderStats> {
        let (raw_tx, raw_rx) = mpsc::channel::<RawChunk>(8);
        let finalize = tokio::spawn(finalize_loop(self.config.clone(), raw_rx, chunk_tx));

        let periodic = self.config.chunk_duration.is_some();
        let period = self
            .config
            .chunk_duration
            .unwrap_or(Duration::from_secs(24 * 60 * 60));
        let mut boundary = tokio::time::interval(period);
        boundary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        boundary.tick().await; // first tick completes immediately

        let mut acc = Accumulation::default();
        let mut sequence = 0u64;

        info!("Starting chunked recording");

        loop {
            tokio::select! {
                maybe = capture_rx.recv() => match maybe {
                    Some(frame) => acc.push(&frame),
                    None => break,
                },
                _ = boundary.tick(), if periodic => {
                    if acc.is_empty() {
                        debug!("Chunk boundary with no accumulated audio, skipping");
                        continue;
                    }
                    let raw = acc.take(sequence, false);
                    sequence += 1;
                    if raw_tx.send(raw).await.is_err() {
                        anyhow::bail!("chunk finalize task terminated unexpectedly");
                    }
                }
            }
        }

        // Stop: flush the partial buffer as a final shorter chunk.
        if !acc.is_empty() {
            let raw = acc.take(sequence, true);
            if raw_tx.send(raw).await.is_err() {
                anyhow::bail!("chunk finalize task terminated before final chunk");
            }
        }
        drop(raw_tx);

        let stats = finalize
            .await
            .context("finalize task panicked")??;

        info!(
            "Chunked recording complete: {} chunks, {} samples",
            stats.chunks_finalized, stats.samples_recorded
        );
        Ok(stats)
    }
}

/// Encodes raw buffers in arrival (= sequence) order and forwards them.
async fn finalize_loop(
    config: RecorderConfig,
    mut raw_rx: mpsc::Receiver<RawChunk>,
    chunk_tx: mpsc::Sender<EncodedChunk>,
) -> Result<RecorderStats> {
    let mut stats = RecorderStats::default();

    while let Some(raw) = raw_rx.recv().await {
        let wav_bytes = encode_wav(&raw.samples, config.sample_rate, config.channels)?;

        if let Some(dir) = &config.save_dir {
            let path = dir.join(format!(
                "audio_{}.wav",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
            ));
            if let Err(e) = fs::write(&path, &wav_bytes) {
                warn!("Failed to save recording to {:?}: {}", path, e);
            } else {
                debug!("Saved recording: {:?}", path);
            }
        }

        let chunk = EncodedChunk {
            sequence_index: raw.sequence_index,
            sample_count: raw.samples.len(),
            start_ms: raw.start_ms,
            end_ms: raw.end_ms,
            is_final: raw.is_final,
            wav_bytes,
        };

        stats.chunks_finalized += 1;
        stats.samples_recorded += chunk.sample_count;

        if chunk_tx.send(chunk).await.is_err() {
            warn!("Chunk consumer gone, discarding remaining chunks");
            break;
        }
    }

    Ok(stats)
}

/// Encode i16 PCM samples into a complete in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}
