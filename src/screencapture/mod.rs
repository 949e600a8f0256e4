// Periodic screen-share rasterization
//
// The engine does not talk to any OS capture API directly: a FrameSource
// supplies raw RGBA frames (injected by the embedding application), and the
// engine turns them into timestamped PNG stills on a fixed interval.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One raw frame from the share stream (RGBA8, row-major)
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Source of screen-share frames.
///
/// `grab_frame` returning an error means the stream is gone (the user
/// revoked sharing externally); the engine stops on its own and flips
/// `is_active` without a `stop()` call.
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the share stream; fails with a permission error if denied
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Rasterize the current frame
    async fn grab_frame(&mut self) -> Result<RawFrame, EngineError>;

    /// Release the stream. Idempotent.
    async fn stop(&mut self) -> Result<(), EngineError>;

    fn name(&self) -> &str;
}

/// A captured still, appended to the session and never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenCapture {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Encoded image bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 5000;

/// Owns the screen-share stream and periodically rasterizes stills.
pub struct ScreenCaptureEngine {
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    is_active: Arc<AtomicBool>,
    capture_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScreenCaptureEngine {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            is_active: Arc::new(AtomicBool::new(false)),
            capture_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start periodic capture, one still every `interval_ms` sent to
    /// `on_capture`. Fails with a permission error if sharing is denied.
    pub async fn start(
        &self,
        on_capture: mpsc::Sender<ScreenCapture>,
        interval_ms: u64,
    ) -> Result<(), EngineError> {
        if self.is_active.load(Ordering::SeqCst) {
            warn!("Screen capture already active");
            return Ok(());
        }

        {
            let mut source = self.source.lock().await;
            source.start().await?;
            info!(
                "Screen capture started (source: {}, interval: {}ms)",
                source.name(),
                interval_ms
            );
        }

        self.is_active.store(true, Ordering::SeqCst);

        let source = Arc::clone(&self.source);
        let is_active = Arc::clone(&self.is_active);

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            // First tick fires immediately; skip it so stills are spaced
            // interval_ms from start
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if !is_active.load(Ordering::SeqCst) {
                    break;
                }

                let frame = {
                    let mut source = source.lock().await;
                    source.grab_frame().await
                };

                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Stream revoked externally; stop without a stop() call
                        warn!("Screen share ended: {}", e);
                        is_active.store(false, Ordering::SeqCst);
                        break;
                    }
                };

                match encode_png(&frame) {
                    Ok(data) => {
                        let capture = ScreenCapture {
                            id: uuid::Uuid::new_v4().to_string(),
                            timestamp: Utc::now(),
                            data,
                            mime_type: "image/png".to_string(),
                            width: frame.width,
                            height: frame.height,
                        };

                        if on_capture.send(capture).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Failed to encode screen frame: {}", e),
                }
            }

            info!("Screen capture task stopped");
        });

        {
            let mut handle = self.capture_task.lock().await;
            *handle = Some(task);
        }

        Ok(())
    }

    /// Release the stream and rendering resources. Idempotent.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let was_active = self.is_active.swap(false, Ordering::SeqCst);

        {
            let mut handle = self.capture_task.lock().await;
            if let Some(task) = handle.take() {
                task.abort();
            }
        }

        if was_active {
            let mut source = self.source.lock().await;
            source.stop().await?;
            info!("Screen capture stopped");
        }

        Ok(())
    }

    /// False both after `stop()` and after the user revokes sharing
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

fn encode_png(frame: &RawFrame) -> Result<Vec<u8>, EngineError> {
    let img = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| {
            EngineError::Capture(format!(
                "frame buffer does not match {}x{} RGBA",
                frame.width, frame.height
            ))
        })?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| EngineError::Capture(format!("PNG encoding failed: {e}")))?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_png_roundtrips_dimensions() {
        let frame = RawFrame {
            width: 4,
            height: 2,
            rgba: vec![255u8; 4 * 2 * 4],
        };

        let png = encode_png(&frame).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();

        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 2);
    }

    #[test]
    fn encode_png_rejects_short_buffer() {
        let frame = RawFrame {
            width: 4,
            height: 2,
            rgba: vec![0u8; 3],
        };

        assert!(encode_png(&frame).is_err());
    }

    #[test]
    fn screen_capture_serializes_data_as_base64() {
        let capture = ScreenCapture {
            id: "cap-1".to_string(),
            timestamp: Utc::now(),
            data: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
            width: 1,
            height: 1,
        };

        let json = serde_json::to_value(&capture).unwrap();
        assert_eq!(json["data"], "AQID");
        assert_eq!(json["mimeType"], "image/png");
    }
}
