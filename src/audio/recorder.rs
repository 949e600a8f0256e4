use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::capture::PcmBlock;

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Duration of each chunk in seconds (default: 300 = 5 minutes)
    pub chunk_duration_secs: u64,
    /// Output directory for chunks
    pub output_dir: PathBuf,
    /// Session ID (used for chunk filenames)
    pub session_id: String,
}

impl RecorderConfig {
    pub fn new(session_id: String, output_dir: PathBuf) -> Self {
        Self {
            chunk_duration_secs: 300,
            output_dir,
            session_id,
        }
    }
}

/// Metadata for a single archived chunk
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    /// Chunk number (0-indexed)
    pub chunk_index: usize,
    /// File path to the chunk
    pub file_path: PathBuf,
    /// Start time in milliseconds since the session started
    pub start_ms: u64,
    /// End time in milliseconds since the session started
    pub end_ms: u64,
    /// Sample rate
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Number of samples in this chunk
    pub sample_count: usize,
}

/// Archives the interview's microphone audio to disk in fixed-duration WAV
/// chunks. The resulting files are the artifact handed to the post-hoc
/// assessment pipeline.
pub struct SessionRecorder {
    config: RecorderConfig,
    current_chunk: Option<ChunkWriter>,
    chunk_index: usize,
}

impl SessionRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)
            .context("Failed to create recordings directory")?;

        info!(
            "Session recorder initialized: {} (chunks: {}s each)",
            config.session_id, config.chunk_duration_secs
        );

        Ok(Self {
            config,
            current_chunk: None,
            chunk_index: 0,
        })
    }

    /// Consume captured blocks until the channel closes, rotating WAV files
    /// at the configured chunk duration.
    pub async fn record(
        &mut self,
        mut block_rx: mpsc::Receiver<PcmBlock>,
    ) -> Result<Vec<ChunkMetadata>> {
        let mut metadata = Vec::new();

        while let Some(block) = block_rx.recv().await {
            if self.should_rotate(&block) {
                if let Some(chunk) = self.current_chunk.take() {
                    let chunk_meta = chunk.finish()?;
                    info!(
                        "Chunk {} complete: {:.1}s - {:.1}s ({} samples)",
                        chunk_meta.chunk_index,
                        chunk_meta.start_ms as f64 / 1000.0,
                        chunk_meta.end_ms as f64 / 1000.0,
                        chunk_meta.sample_count
                    );
                    metadata.push(chunk_meta);
                }

                self.current_chunk = Some(self.start_chunk(&block)?);
            }

            if let Some(chunk) = &mut self.current_chunk {
                chunk.write_block(&block)?;
            }
        }

        if let Some(chunk) = self.current_chunk.take() {
            let chunk_meta = chunk.finish()?;
            metadata.push(chunk_meta);
        }

        info!("Session archival complete: {} chunks saved", metadata.len());

        Ok(metadata)
    }

    fn should_rotate(&self, block: &PcmBlock) -> bool {
        match &self.current_chunk {
            None => true,
            Some(chunk) => {
                let chunk_duration_ms = self.config.chunk_duration_secs * 1000;
                block.timestamp_ms.saturating_sub(chunk.metadata.start_ms) >= chunk_duration_ms
            }
        }
    }

    fn start_chunk(&mut self, block: &PcmBlock) -> Result<ChunkWriter> {
        let chunk_path = self.config.output_dir.join(format!(
            "{}-chunk-{:03}.wav",
            self.config.session_id, self.chunk_index
        ));

        let chunk = ChunkWriter::new(
            chunk_path,
            self.chunk_index,
            block.timestamp_ms,
            block.sample_rate,
            block.channels,
        )?;

        self.chunk_index += 1;

        Ok(chunk)
    }
}

/// Writes a single chunk to disk as a WAV file
struct ChunkWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    metadata: ChunkMetadata,
}

impl ChunkWriter {
    fn new(
        file_path: PathBuf,
        chunk_index: usize,
        start_ms: u64,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&file_path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", file_path))?;

        Ok(Self {
            writer: Some(writer),
            metadata: ChunkMetadata {
                chunk_index,
                file_path,
                start_ms,
                end_ms: start_ms,
                sample_rate,
                channels,
                sample_count: 0,
            },
        })
    }

    fn write_block(&mut self, block: &PcmBlock) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in &block.samples {
                writer.write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }

            self.metadata.end_ms = block.timestamp_ms;
            self.metadata.sample_count += block.samples.len();
        }

        Ok(())
    }

    fn finish(mut self) -> Result<ChunkMetadata> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()
                .context("Failed to finalize WAV file")?;
        }

        Ok(self.metadata.clone())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

/// Convenience entry point used by the orchestrator: spawns the archival
/// task and returns the sender side of its block channel.
pub fn spawn_recorder(
    config: RecorderConfig,
) -> Result<(
    mpsc::Sender<PcmBlock>,
    tokio::task::JoinHandle<Result<Vec<ChunkMetadata>>>,
)> {
    let mut recorder = SessionRecorder::new(config)?;
    let (tx, rx) = mpsc::channel(100);
    let handle = tokio::spawn(async move { recorder.record(rx).await });
    Ok((tx, handle))
}
