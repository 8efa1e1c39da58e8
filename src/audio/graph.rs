//! Audio graph: per-source processing chains feeding two sinks.
//!
//! The mix task pulls frames from the microphone and tab streams, runs each
//! through its source's chain, time-aligns and sums them, and fans every
//! mixed frame out to two independent sinks: the monitor bus (live output)
//! and the capture bus (recorder input). Both buses receive the same
//! logical content; a slow or detached monitor never starves the capture
//! path.

use anyhow::Result;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dsp::{ChainParams, ProcessingChain};
use super::source::{AudioFrame, SourceKind};

const BUS_CHANNEL_CAPACITY: usize = 32;

/// Configuration for the audio graph.
///
/// One validated sample rate governs every node; frames that disagree are
/// dropped with a warning rather than mixed at the wrong rate.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Tab chain output gain (typically 0.1 to 0.7).
    pub tab_gain: f32,
    /// Mic chain output gain (typically 0.7 to 1.0).
    pub mic_gain: f32,
    /// Frames older than this relative to the mix position are dropped.
    pub max_buffer_delay_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            tab_gain: 0.7,
            mic_gain: 1.0,
            max_buffer_delay_ms: 200,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GraphStats {
    pub mixed_frames: usize,
    pub dropped_frames: usize,
    pub monitor_dropped: usize,
}

/// The graph's two sinks plus the running mix task.
pub struct MixBus {
    pub monitor_rx: mpsc::Receiver<AudioFrame>,
    pub capture_rx: mpsc::Receiver<AudioFrame>,
    pub task: JoinHandle<Result<GraphStats>>,
}

/// Consumes the monitor bus, normally by playing it on the output device.
#[async_trait::async_trait]
pub trait MonitorSink: Send + Sync {
    async fn play(&self, frame: AudioFrame) -> Result<()>;
}

/// Discards monitor frames. Used headless and in tests.
pub struct NullMonitorSink;

#[async_trait::async_trait]
impl MonitorSink for NullMonitorSink {
    async fn play(&self, _frame: AudioFrame) -> Result<()> {
        Ok(())
    }
}

pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the graph over the two acquired source streams and spawn the
    /// mix task.
    pub fn build(
        mic_rx: mpsc::Receiver<AudioFrame>,
        tab_rx: mpsc::Receiver<AudioFrame>,
        config: &GraphConfig,
    ) -> MixBus {
        info!(
            "Audio graph initialized: {}Hz, {} channels, tab_gain={}, mic_gain={}",
            config.sample_rate, config.channels, config.tab_gain, config.mic_gain
        );

        let (monitor_tx, monitor_rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);
        let (capture_tx, capture_rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);

        let state = MixState::new(config.clone());
        let task = tokio::spawn(run_graph(state, mic_rx, tab_rx, monitor_tx, capture_tx));

        MixBus {
            monitor_rx,
            capture_rx,
            task,
        }
    }
}

async fn run_graph(
    mut state: MixState,
    mut mic_rx: mpsc::Receiver<AudioFrame>,
    mut tab_rx: mpsc::Receiver<AudioFrame>,
    monitor_tx: mpsc::Sender<AudioFrame>,
    capture_tx: mpsc::Sender<AudioFrame>,
) -> Result<GraphStats> {
    let mut mic_open = true;
    let mut tab_open = true;

    loop {
        tokio::select! {
            maybe = mic_rx.recv(), if mic_open => match maybe {
                Some(frame) => state.ingest(frame),
                None => mic_open = false,
            },
            maybe = tab_rx.recv(), if tab_open => match maybe {
                Some(frame) => state.ingest(frame),
                None => tab_open = false,
            },
            else => break,
        }

        // Once one source has ended, the survivor passes through alone.
        let force = !mic_open || !tab_open;
        while let Some(mixed) = state.mix_next(force) {
            if !fan_out(mixed, &capture_tx, &monitor_tx, &mut state.stats).await {
                info!("Capture bus closed, stopping audio graph");
                return Ok(state.stats);
            }
        }
    }

    // Flush whatever is still buffered.
    while let Some(mixed) = state.mix_next(true) {
        if !fan_out(mixed, &capture_tx, &monitor_tx, &mut state.stats).await {
            break;
        }
    }

    info!(
        "Audio graph finished: {} mixed frames, {} dropped",
        state.stats.mixed_frames, state.stats.dropped_frames
    );
    Ok(state.stats)
}

/// Deliver one mixed frame to both buses.
///
/// The capture bus is authoritative: a closed capture consumer ends the
/// graph (returns false). The monitor bus is best-effort; a full or closed
/// monitor only loses monitor frames.
async fn fan_out(
    frame: AudioFrame,
    capture_tx: &mpsc::Sender<AudioFrame>,
    monitor_tx: &mpsc::Sender<AudioFrame>,
    stats: &mut GraphStats,
) -> bool {
    if monitor_tx.try_send(frame.clone()).is_err() {
        stats.monitor_dropped += 1;
        debug!("Monitor bus frame dropped");
    }

    capture_tx.send(frame).await.is_ok()
}

struct MixState {
    config: GraphConfig,
    mic_chain: ProcessingChain,
    tab_chain: ProcessingChain,
    mic_buffer: VecDeque<AudioFrame>,
    tab_buffer: VecDeque<AudioFrame>,
    current_position_ms: u64,
    stats: GraphStats,
}

impl MixState {
    fn new(config: GraphConfig) -> Self {
        let mic_chain = ProcessingChain::for_source(
            SourceKind::Microphone,
            ChainParams {
                sample_rate: config.sample_rate,
                gain: config.mic_gain,
            },
        );
        let tab_chain = ProcessingChain::for_source(
            SourceKind::Tab,
            ChainParams {
                sample_rate: config.sample_rate,
                gain: config.tab_gain,
            },
        );

        Self {
            config,
            mic_chain,
            tab_chain,
            mic_buffer: VecDeque::new(),
            tab_buffer: VecDeque::new(),
            current_position_ms: 0,
            stats: GraphStats::default(),
        }
    }

    /// Validate, process, and buffer one incoming frame.
    fn ingest(&mut self, mut frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Frame sample rate mismatch: expected {}, got {}. Dropping frame.",
                self.config.sample_rate, frame.sample_rate
            );
            self.stats.dropped_frames += 1;
            return;
        }

        if frame.channels != self.config.channels {
            warn!(
                "Frame channel count mismatch: expected {}, got {}. Dropping frame.",
                self.config.channels, frame.channels
            );
            self.stats.dropped_frames += 1;
            return;
        }

        match frame.source {
            SourceKind::Microphone => {
                self.mic_chain.process_frame(&mut frame);
                self.mic_buffer.push_back(frame);
            }
            SourceKind::Tab => {
                self.tab_chain.process_frame(&mut frame);
                self.tab_buffer.push_back(frame);
            }
        }

        self.cleanup_old_frames();
    }

    /// Drop frames that fell too far behind the mix position.
    fn cleanup_old_frames(&mut self) {
        let cutoff = self
            .current_position_ms
            .saturating_sub(self.config.max_buffer_delay_ms);

        for buffer in [&mut self.mic_buffer, &mut self.tab_buffer] {
            while let Some(front) = buffer.front() {
                if front.timestamp_ms < cutoff {
                    warn!(
                        "Dropping stale {:?} frame at {}ms (mix position {}ms)",
                        front.source, front.timestamp_ms, self.current_position_ms
                    );
                    buffer.pop_front();
                    self.stats.dropped_frames += 1;
                } else {
                    break;
                }
            }
        }
    }

    /// Produce the next mixed frame if enough input is buffered.
    ///
    /// With both sources live a frame is only produced when each has data,
    /// so the buses always carry both sources at the configured balance.
    /// `force` lets a lone survivor pass through (source ended or flush).
    fn mix_next(&mut self, force: bool) -> Option<AudioFrame> {
        let mixed = if !self.mic_buffer.is_empty() && !self.tab_buffer.is_empty() {
            let a = self.mic_buffer.pop_front()?;
            let b = self.tab_buffer.pop_front()?;
            mix_frames(&[a, b], self.config.sample_rate, self.config.channels)
        } else if force {
            self.mic_buffer
                .pop_front()
                .or_else(|| self.tab_buffer.pop_front())?
        } else {
            return None;
        };

        self.current_position_ms = mixed.timestamp_ms;
        self.stats.mixed_frames += 1;
        Some(mixed)
    }
}

/// Sum frames sample-wise with clipping. The output carries the earliest
/// timestamp and the length of the longest input.
fn mix_frames(frames: &[AudioFrame], sample_rate: u32, channels: u16) -> AudioFrame {
    let timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);
    let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);

    let mut mixed = Vec::with_capacity(max_len);
    for i in 0..max_len {
        let sum: i32 = frames
            .iter()
            .map(|f| f.samples.get(i).copied().unwrap_or(0) as i32)
            .sum();
        mixed.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples: mixed,
        sample_rate,
        channels,
        timestamp_ms,
        source: SourceKind::Tab,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(source: SourceKind, timestamp_ms: u64, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 48000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<AudioFrame>) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        while let Some(f) = rx.recv().await {
            out.push(f);
        }
        out
    }

    #[test]
    fn test_mix_frames_sums_samples() {
        let frames = vec![
            frame(SourceKind::Tab, 0, vec![100, 200, 300]),
            frame(SourceKind::Microphone, 0, vec![50, 100, 150]),
        ];
        let mixed = mix_frames(&frames, 48000, 1);

        assert_eq!(mixed.samples, vec![150, 300, 450]);
    }

    #[test]
    fn test_mix_frames_clips() {
        let frames = vec![
            frame(SourceKind::Tab, 0, vec![i16::MAX - 100]),
            frame(SourceKind::Microphone, 0, vec![200]),
        ];
        let mixed = mix_frames(&frames, 48000, 1);

        assert_eq!(mixed.samples, vec![i16::MAX]);
    }

    #[test]
    fn test_mix_frames_different_lengths() {
        let frames = vec![
            frame(SourceKind::Tab, 0, vec![100, 200]),
            frame(SourceKind::Microphone, 0, vec![50, 100, 150, 200]),
        ];
        let mixed = mix_frames(&frames, 48000, 1);

        assert_eq!(mixed.samples, vec![150, 300, 150, 200]);
    }

    #[tokio::test]
    async fn test_both_buses_receive_identical_content() {
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (tab_tx, tab_rx) = mpsc::channel(16);
        let bus = GraphBuilder::build(mic_rx, tab_rx, &GraphConfig::default());

        for i in 0..5u64 {
            mic_tx
                .send(frame(SourceKind::Microphone, i * 100, vec![1000; 480]))
                .await
                .unwrap();
            tab_tx
                .send(frame(SourceKind::Tab, i * 100, vec![-500; 480]))
                .await
                .unwrap();
        }
        drop(mic_tx);
        drop(tab_tx);

        let capture = drain(bus.capture_rx).await;
        let monitor = drain(bus.monitor_rx).await;
        let stats = bus.task.await.unwrap().unwrap();

        assert_eq!(capture.len(), 5);
        assert_eq!(monitor.len(), capture.len());
        for (c, m) in capture.iter().zip(&monitor) {
            assert_eq!(c.samples, m.samples);
            assert_eq!(c.timestamp_ms, m.timestamp_ms);
        }
        assert_eq!(stats.mixed_frames, 5);
    }

    #[tokio::test]
    async fn test_single_source_reaches_both_buses() {
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (tab_tx, tab_rx) = mpsc::channel(16);
        let bus = GraphBuilder::build(mic_rx, tab_rx, &GraphConfig::default());

        drop(tab_tx);
        for i in 0..3u64 {
            mic_tx
                .send(frame(SourceKind::Microphone, i * 100, vec![2000; 480]))
                .await
                .unwrap();
        }
        drop(mic_tx);

        let capture = drain(bus.capture_rx).await;
        let monitor = drain(bus.monitor_rx).await;

        assert_eq!(capture.len(), 3, "capture bus must see the lone source");
        assert_eq!(monitor.len(), 3, "monitor bus must see the lone source");
    }

    #[tokio::test]
    async fn test_mismatched_sample_rate_is_dropped() {
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (tab_tx, tab_rx) = mpsc::channel(16);
        let bus = GraphBuilder::build(mic_rx, tab_rx, &GraphConfig::default());

        let mut bad = frame(SourceKind::Microphone, 0, vec![100; 160]);
        bad.sample_rate = 16000;
        mic_tx.send(bad).await.unwrap();
        drop(mic_tx);
        drop(tab_tx);

        let capture = drain(bus.capture_rx).await;
        let stats = bus.task.await.unwrap().unwrap();

        assert!(capture.is_empty());
        assert_eq!(stats.dropped_frames, 1);
    }

    #[tokio::test]
    async fn test_closed_monitor_does_not_detach_capture() {
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (tab_tx, tab_rx) = mpsc::channel(16);
        let bus = GraphBuilder::build(mic_rx, tab_rx, &GraphConfig::default());

        drop(bus.monitor_rx);
        drop(tab_tx);
        for i in 0..4u64 {
            mic_tx
                .send(frame(SourceKind::Microphone, i * 100, vec![500; 480]))
                .await
                .unwrap();
        }
        drop(mic_tx);

        let capture = drain(bus.capture_rx).await;
        assert_eq!(capture.len(), 4);
    }
}
