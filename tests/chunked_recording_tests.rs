// Integration tests for the chunked recorder.
//
// These tests verify that capture-bus audio is sliced into time-boxed
// chunks on the boundary timer, that every sample lands in exactly one
// chunk, and that each chunk is a standalone playable WAV file.

use anyhow::Result;
use mixtap::{AudioFrame, ChunkedRecorder, EncodedChunk, RecorderConfig, SourceKind};
use std::io::Cursor;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const SAMPLE_RATE: u32 = 48000;
const FRAME_INTERVAL: Duration = Duration::from_millis(100);
const SAMPLES_PER_FRAME: usize = 4800; // 100ms at 48kHz

fn frame(index: u64) -> AudioFrame {
    AudioFrame {
        samples: vec![(index % 1000) as i16; SAMPLES_PER_FRAME],
        sample_rate: SAMPLE_RATE,
        channels: 1,
        timestamp_ms: index * 100,
        source: SourceKind::Tab,
    }
}

fn decode(chunk: &EncodedChunk) -> Vec<i16> {
    let reader = hound::WavReader::new(Cursor::new(&chunk.wav_bytes)).expect("valid WAV");
    reader.into_samples::<i16>().map(|s| s.unwrap()).collect()
}

async fn collect(mut chunk_rx: mpsc::Receiver<EncodedChunk>) -> Vec<EncodedChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = chunk_rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

#[tokio::test(start_paused = true)]
async fn test_25_seconds_yields_three_chunks() -> Result<()> {
    let recorder = ChunkedRecorder::new(RecorderConfig {
        chunk_duration: Some(Duration::from_secs(10)),
        sample_rate: SAMPLE_RATE,
        channels: 1,
        save_dir: None,
    })?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let handle = tokio::spawn(recorder.run(frame_rx, chunk_tx));

    // 25 seconds of frames at 100ms intervals.
    let mut sent = Vec::new();
    for i in 0..250u64 {
        let f = frame(i);
        sent.extend_from_slice(&f.samples);
        frame_tx.send(f).await?;
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    drop(frame_tx);

    let stats = handle.await??;
    let chunks = collect(chunk_rx).await;

    // Boundaries at 10s and 20s plus the final partial chunk at stop.
    assert_eq!(chunks.len(), 3, "expected 3 chunks for 25s of audio");
    assert_eq!(stats.chunks_finalized, 3);

    // Sequence indices are contiguous, only the last chunk is final.
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence_index, i as u64);
        assert_eq!(chunk.is_final, i == chunks.len() - 1);
        assert!(chunk.sample_count > 0);
    }

    // Byte accounting: the concatenation of all chunks equals the full
    // capture-bus stream, no gaps, no duplication.
    let mut reassembled = Vec::new();
    for chunk in &chunks {
        let decoded = decode(chunk);
        assert_eq!(decoded.len(), chunk.sample_count);
        reassembled.extend(decoded);
    }
    assert_eq!(reassembled, sent);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_boundary_flushes_partial_chunk() -> Result<()> {
    let recorder = ChunkedRecorder::new(RecorderConfig {
        chunk_duration: Some(Duration::from_secs(10)),
        sample_rate: SAMPLE_RATE,
        channels: 1,
        save_dir: None,
    })?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let handle = tokio::spawn(recorder.run(frame_rx, chunk_tx));

    // Only 3 seconds of audio, then stop.
    for i in 0..30u64 {
        frame_tx.send(frame(i)).await?;
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    drop(frame_tx);

    handle.await??;
    let chunks = collect(chunk_rx).await;

    assert_eq!(chunks.len(), 1, "partial buffer must become a final chunk");
    assert!(chunks[0].is_final);
    assert_eq!(chunks[0].sample_count, 30 * SAMPLES_PER_FRAME);
    assert_eq!(chunks[0].start_ms, 0);
    assert_eq!(chunks[0].end_ms, 2900);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_input_produces_no_chunks() -> Result<()> {
    let recorder = ChunkedRecorder::new(RecorderConfig::default())?;

    let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(4);
    let (chunk_tx, chunk_rx) = mpsc::channel(4);
    drop(frame_tx);

    let stats = recorder.run(frame_rx, chunk_tx).await?;
    let chunks = collect(chunk_rx).await;

    assert!(chunks.is_empty());
    assert_eq!(stats.chunks_finalized, 0);
    assert_eq!(stats.samples_recorded, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_mode_yields_one_final_chunk() -> Result<()> {
    let recorder = ChunkedRecorder::new(RecorderConfig {
        chunk_duration: None,
        sample_rate: SAMPLE_RATE,
        channels: 1,
        save_dir: None,
    })?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let handle = tokio::spawn(recorder.run(frame_rx, chunk_tx));

    // Well past the chunked-mode boundary interval.
    for i in 0..250u64 {
        frame_tx.send(frame(i)).await?;
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    drop(frame_tx);

    handle.await??;
    let chunks = collect(chunk_rx).await;

    assert_eq!(chunks.len(), 1, "single-shot mode never splits");
    assert!(chunks[0].is_final);
    assert_eq!(chunks[0].sample_count, 250 * SAMPLES_PER_FRAME);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_chunks_are_valid_wav_files() -> Result<()> {
    let recorder = ChunkedRecorder::new(RecorderConfig {
        chunk_duration: Some(Duration::from_secs(2)),
        sample_rate: SAMPLE_RATE,
        channels: 1,
        save_dir: None,
    })?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let handle = tokio::spawn(recorder.run(frame_rx, chunk_tx));

    for i in 0..50u64 {
        frame_tx.send(frame(i)).await?;
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    drop(frame_tx);
    handle.await??;

    let chunks = collect(chunk_rx).await;
    assert!(!chunks.is_empty());

    for chunk in &chunks {
        let reader = hound::WavReader::new(Cursor::new(&chunk.wav_bytes))?;
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_save_dir_writes_recordings() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let recorder = ChunkedRecorder::new(RecorderConfig {
        chunk_duration: Some(Duration::from_secs(10)),
        sample_rate: SAMPLE_RATE,
        channels: 1,
        save_dir: Some(temp_dir.path().to_path_buf()),
    })?;

    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (chunk_tx, chunk_rx) = mpsc::channel(64);
    let handle = tokio::spawn(recorder.run(frame_rx, chunk_tx));

    for i in 0..10u64 {
        frame_tx.send(frame(i)).await?;
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
    drop(frame_tx);
    handle.await??;
    let chunks = collect(chunk_rx).await;
    assert_eq!(chunks.len(), 1);

    let saved: Vec<_> = std::fs::read_dir(temp_dir.path())?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].starts_with("audio_"), "got {}", saved[0]);
    assert!(saved[0].ends_with(".wav"));

    Ok(())
}
