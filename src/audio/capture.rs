use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A block of captured audio (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct PcmBlock {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl PcmBlock {
    /// Samples as little-endian bytes, the layout the wire protocol expects.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Configuration for capture backends
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u16,
    /// Block size in milliseconds (affects latency)
    pub block_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // 16kHz mono is what the model ingests
            channels: 1,
            block_duration_ms: 100,
        }
    }
}

impl CaptureConfig {
    pub fn block_samples(&self) -> usize {
        (self.sample_rate as u64 * self.channels as u64 * self.block_duration_ms / 1000) as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input stream on the default host device
/// - File: read from a WAV file (for testing/batch processing)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive PCM blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<PcmBlock>, EngineError>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<(), EngineError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture source type
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Microphone input
    Microphone,
    /// File input (for testing/batch processing)
    File(String),
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(
        source: CaptureSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, EngineError> {
        match source {
            CaptureSource::Microphone => Ok(Box::new(MicrophoneBackend::new(config))),
            CaptureSource::File(path) => {
                let backend = super::file::FileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Microphone capture via cpal.
///
/// The cpal stream is not `Send`, so it lives on a dedicated capture thread;
/// the device callback converts f32 samples to i16 and forwards fixed-size
/// blocks over a channel. Nothing but messages crosses the thread boundary.
pub struct MicrophoneBackend {
    config: CaptureConfig,
    capturing: Arc<AtomicBool>,
    shutdown_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<PcmBlock>, EngineError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(EngineError::Capture("microphone already capturing".into()));
        }

        info!(
            "Starting microphone capture ({}Hz, {} channels)",
            self.config.sample_rate, self.config.channels
        );

        let (block_tx, block_rx) = mpsc::channel::<PcmBlock>(100);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(), EngineError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                capture_thread(config, block_tx, ready_tx, shutdown_rx, capturing);
            })
            .map_err(|e| EngineError::Capture(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(EngineError::Capture(
                    "capture thread exited before reporting readiness".into(),
                ))
            }
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.thread = Some(thread);
        self.capturing.store(true, Ordering::SeqCst);

        info!("Microphone capture started");

        Ok(block_rx)
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping microphone capture");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

fn capture_thread(
    config: CaptureConfig,
    block_tx: mpsc::Sender<PcmBlock>,
    ready_tx: tokio::sync::oneshot::Sender<Result<(), EngineError>>,
    shutdown_rx: std::sync::mpsc::Receiver<()>,
    capturing: Arc<AtomicBool>,
) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(EngineError::Permission(
                "no input device available (microphone missing or access denied)".into(),
            )));
            return;
        }
    };

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let block_samples = config.block_samples();
    let sample_rate = config.sample_rate;
    let channels = config.channels;
    let started = Instant::now();
    let mut pending: Vec<i16> = Vec::with_capacity(block_samples);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _| {
            for &sample in data {
                pending.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
            }
            while pending.len() >= block_samples {
                let samples: Vec<i16> = pending.drain(..block_samples).collect();
                let block = PcmBlock {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                };
                // Device callback runs on the realtime audio thread; never block it
                if let Err(e) = block_tx.try_send(block) {
                    warn!("Dropping capture block: {}", e);
                }
            }
        },
        |e| error!("Microphone stream error: {}", e),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(EngineError::Permission(format!(
                "failed to open microphone stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EngineError::Capture(format!(
            "failed to start microphone stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Hold the stream until stop() signals; dropping it releases the device
    let _ = shutdown_rx.recv();
    drop(stream);
    capturing.store(false, Ordering::SeqCst);

    info!("Microphone capture thread exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_samples_scales_with_duration() {
        let config = CaptureConfig::default();
        assert_eq!(config.block_samples(), 1600); // 100ms at 16kHz mono

        let config = CaptureConfig {
            sample_rate: 16000,
            channels: 1,
            block_duration_ms: 250,
        };
        assert_eq!(config.block_samples(), 4000);
    }

    #[test]
    fn pcm_block_little_endian_layout() {
        let block = PcmBlock {
            samples: vec![1, -2],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        };

        assert_eq!(block.to_le_bytes(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }
}
