use super::capture::{CaptureBackend, CaptureConfig, PcmBlock};
use crate::error::EngineError;
use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that streams a WAV file as paced PCM blocks.
///
/// Stands in for a live microphone in batch tooling and tests. The file must
/// already match the configured rate and channel count; this backend does
/// not resample.
pub struct FileBackend {
    file: AudioFile,
    config: CaptureConfig,
    capturing: Arc<AtomicBool>,
    /// Stream blocks in real time; tests disable pacing to run instantly
    pub paced: bool,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self, EngineError> {
        let file = AudioFile::open(path)
            .map_err(|e| EngineError::Capture(format!("failed to open capture file: {e}")))?;

        if file.sample_rate != config.sample_rate || file.channels != config.channels {
            return Err(EngineError::Capture(format!(
                "capture file format mismatch: expected {}Hz {}ch, got {}Hz {}ch",
                config.sample_rate, config.channels, file.sample_rate, file.channels
            )));
        }

        Ok(Self {
            file,
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            paced: true,
        })
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<PcmBlock>, EngineError> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Capture("file backend already capturing".into()));
        }

        let (tx, rx) = mpsc::channel::<PcmBlock>(100);
        let samples = self.file.samples.clone();
        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);
        let paced = self.paced;

        tokio::spawn(async move {
            let block_samples = config.block_samples();
            let block_duration = std::time::Duration::from_millis(config.block_duration_ms);
            let mut timestamp_ms = 0u64;

            for chunk in samples.chunks(block_samples) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let block = PcmBlock {
                    samples: chunk.to_vec(),
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms,
                };
                timestamp_ms += config.block_duration_ms;

                if tx.send(block).await.is_err() {
                    break;
                }
                if paced {
                    tokio::time::sleep(block_duration).await;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File capture finished");
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
