use super::capture::{CaptureBackend, CaptureConfig, PcmBlock};
use crate::error::EngineError;
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A transport-ready encoded audio chunk
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Base64-encoded PCM16 little-endian bytes
    pub data: String,
    /// Mime type including the sample rate, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Owns the microphone and converts captured samples into encoded chunks.
///
/// Chunk size is determined by the backend's block size, not the caller.
/// Blocks that arrive after `stop()` are dropped by the `is_recording`
/// guard rather than by unsubscribing, so in-flight blocks racing a stop
/// never reach the callback channel.
pub struct AudioCaptureEngine {
    backend: Arc<Mutex<Box<dyn CaptureBackend>>>,
    config: CaptureConfig,
    is_recording: Arc<AtomicBool>,
    forward_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AudioCaptureEngine {
    pub fn new(backend: Box<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            config,
            is_recording: Arc::new(AtomicBool::new(false)),
            forward_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start capturing; encoded chunks flow to `on_chunk`, raw blocks are
    /// teed to `raw_tee` when provided (session archival).
    ///
    /// Fails with a permission/capture error if the microphone cannot be
    /// acquired. No automatic retry; the caller re-invokes `start`.
    pub async fn start(
        &self,
        on_chunk: mpsc::Sender<EncodedChunk>,
        raw_tee: Option<mpsc::Sender<PcmBlock>>,
    ) -> Result<(), EngineError> {
        if self.is_recording.load(Ordering::SeqCst) {
            warn!("Audio capture already started");
            return Ok(());
        }

        let mut block_rx = {
            let mut backend = self.backend.lock().await;
            backend.start().await?
        };

        self.is_recording.store(true, Ordering::SeqCst);

        let is_recording = Arc::clone(&self.is_recording);
        let mime_type = format!("audio/pcm;rate={}", self.config.sample_rate);

        let task = tokio::spawn(async move {
            info!("Audio forwarding task started");

            while let Some(block) = block_rx.recv().await {
                // Blocks in flight when stop() lands are dropped here
                if !is_recording.load(Ordering::SeqCst) {
                    debug!("Dropping capture block after stop");
                    continue;
                }

                if let Some(tee) = &raw_tee {
                    if let Err(e) = tee.try_send(block.clone()) {
                        warn!("Failed to tee capture block to recorder: {}", e);
                    }
                }

                let chunk = EncodedChunk {
                    data: base64::engine::general_purpose::STANDARD.encode(block.to_le_bytes()),
                    mime_type: mime_type.clone(),
                    timestamp_ms: block.timestamp_ms,
                };

                if on_chunk.send(chunk).await.is_err() {
                    error!("Chunk receiver dropped; stopping audio forwarding");
                    break;
                }
            }

            info!("Audio forwarding task stopped");
        });

        {
            let mut handle = self.forward_task.lock().await;
            *handle = Some(task);
        }

        Ok(())
    }

    /// Release the microphone. Idempotent; calling twice is a no-op.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if !self.is_recording.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping audio capture");

        {
            let mut backend = self.backend.lock().await;
            backend.stop().await?;
        }

        // Backend stop closes the block channel, so the forwarder drains out
        {
            let mut handle = self.forward_task.lock().await;
            if let Some(task) = handle.take() {
                if let Err(e) = task.await {
                    error!("Audio forwarding task panicked: {}", e);
                }
            }
        }

        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}
