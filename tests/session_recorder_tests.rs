// Integration tests for session audio archival
//
// These verify that captured PCM blocks are split into time-based WAV
// chunks on disk, the artifact handed to the assessment pipeline.

use anyhow::Result;
use interview_live::audio::{PcmBlock, RecorderConfig, SessionRecorder};
use std::fs;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn block(i: u64, samples: usize) -> PcmBlock {
    PcmBlock {
        samples: vec![(i % 100) as i16; samples],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: i * 100,
    }
}

#[tokio::test]
async fn short_session_produces_a_single_chunk() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let config = RecorderConfig {
        chunk_duration_secs: 10,
        output_dir: temp_dir.path().to_path_buf(),
        session_id: "test-session".to_string(),
    };

    let mut recorder = SessionRecorder::new(config)?;
    let (tx, rx) = mpsc::channel(100);

    let handle = tokio::spawn(async move { recorder.record(rx).await });

    // 5 seconds of audio in 100ms blocks
    for i in 0..50 {
        tx.send(block(i, 1600)).await?;
    }
    drop(tx);

    let metadata = handle.await??;

    assert_eq!(metadata.len(), 1, "Should create exactly 1 chunk");

    let chunk = &metadata[0];
    assert_eq!(chunk.chunk_index, 0);
    assert_eq!(chunk.sample_rate, 16000);
    assert_eq!(chunk.channels, 1);
    assert_eq!(chunk.start_ms, 0);
    assert_eq!(chunk.end_ms, 4900);
    assert_eq!(chunk.sample_count, 1600 * 50);

    assert!(chunk.file_path.exists());
    assert!(chunk
        .file_path
        .to_string_lossy()
        .contains("test-session-chunk-000.wav"));
    assert!(fs::metadata(&chunk.file_path)?.len() > 0);

    Ok(())
}

#[tokio::test]
async fn long_session_rotates_chunks() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let config = RecorderConfig {
        chunk_duration_secs: 2,
        output_dir: temp_dir.path().to_path_buf(),
        session_id: "rotation-test".to_string(),
    };

    let mut recorder = SessionRecorder::new(config)?;
    let (tx, rx) = mpsc::channel(100);

    let handle = tokio::spawn(async move { recorder.record(rx).await });

    // 5 seconds with 2s chunks: [0-2s], [2-4s], [4-5s]
    for i in 0..50 {
        tx.send(block(i, 1600)).await?;
    }
    drop(tx);

    let metadata = handle.await??;

    assert_eq!(metadata.len(), 3);
    assert_eq!(metadata[0].start_ms, 0);
    assert!(metadata[0].end_ms >= 1900 && metadata[0].end_ms < 2100);
    assert!(metadata[1].start_ms >= 1900 && metadata[1].start_ms < 2100);
    assert_eq!(metadata[2].end_ms, 4900);

    for chunk in &metadata {
        assert!(chunk.file_path.exists(), "Chunk {} file should exist", chunk.chunk_index);
    }

    Ok(())
}

#[tokio::test]
async fn empty_input_produces_no_chunks() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let config = RecorderConfig {
        chunk_duration_secs: 5,
        output_dir: temp_dir.path().to_path_buf(),
        session_id: "empty-test".to_string(),
    };

    let mut recorder = SessionRecorder::new(config)?;
    let (tx, rx) = mpsc::channel::<PcmBlock>(100);
    drop(tx);

    let metadata = recorder.record(rx).await?;
    assert_eq!(metadata.len(), 0);

    Ok(())
}

#[test]
fn recorder_config_defaults_to_five_minute_chunks() {
    let config = RecorderConfig::new(
        "test-session".to_string(),
        std::path::PathBuf::from("/tmp/recordings"),
    );

    assert_eq!(config.session_id, "test-session");
    assert_eq!(config.chunk_duration_secs, 300);
}
