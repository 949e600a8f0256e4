use crate::error::EngineError;
use std::sync::Mutex;
use tracing::{error, info};

/// Output seam for scheduled playback.
///
/// `play` appends a frame to the device queue for gapless back-to-back
/// output; `halt` discards everything queued on the device immediately.
/// The scheduler owns all timing decisions; sinks only queue and cut.
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<(), EngineError>;

    async fn halt(&self) -> Result<(), EngineError>;

    fn name(&self) -> &str;
}

enum SinkCommand {
    Play { samples: Vec<f32>, sample_rate: u32 },
    Halt,
    Shutdown,
}

/// Speaker output via rodio.
///
/// rodio's `OutputStream` and `Sink` are not `Send`, so they live on a
/// dedicated playback thread that consumes commands from a channel.
pub struct RodioSink {
    tx: Mutex<Option<std::sync::mpsc::Sender<SinkCommand>>>,
}

impl RodioSink {
    pub fn new() -> Result<Self, EngineError> {
        let (tx, rx) = std::sync::mpsc::channel::<SinkCommand>();

        std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(rx))
            .map_err(|e| EngineError::Playback(format!("failed to spawn playback thread: {e}")))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    fn send(&self, cmd: SinkCommand) -> Result<(), EngineError> {
        let guard = self.tx.lock().expect("playback sink lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| EngineError::Playback("playback thread has exited".into())),
            None => Err(EngineError::Playback("playback sink is closed".into())),
        }
    }
}

#[async_trait::async_trait]
impl PlaybackSink for RodioSink {
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<(), EngineError> {
        self.send(SinkCommand::Play {
            samples,
            sample_rate,
        })
    }

    async fn halt(&self) -> Result<(), EngineError> {
        self.send(SinkCommand::Halt)
    }

    fn name(&self) -> &str {
        "rodio"
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(SinkCommand::Shutdown);
            }
        }
    }
}

fn playback_thread(rx: std::sync::mpsc::Receiver<SinkCommand>) {
    use rodio::buffer::SamplesBuffer;
    use rodio::{OutputStream, Sink};

    let mut _stream: Option<OutputStream> = None;
    let mut sink: Option<Sink> = None;

    fn ensure_sink(
        stream: &mut Option<OutputStream>,
        sink: &mut Option<Sink>,
    ) -> Result<(), String> {
        if sink.is_none() {
            let (s, handle) = OutputStream::try_default()
                .map_err(|e| format!("failed to open audio output stream: {e}"))?;
            let new_sink =
                Sink::try_new(&handle).map_err(|e| format!("failed to create audio sink: {e}"))?;
            *stream = Some(s);
            *sink = Some(new_sink);
        }
        Ok(())
    }

    while let Ok(cmd) = rx.recv() {
        match cmd {
            SinkCommand::Play {
                samples,
                sample_rate,
            } => {
                if let Err(e) = ensure_sink(&mut _stream, &mut sink) {
                    error!("Playback output unavailable: {}", e);
                    continue;
                }
                if let Some(ref s) = sink {
                    s.append(SamplesBuffer::new(1, sample_rate, samples));
                }
            }
            SinkCommand::Halt => {
                // stop() discards everything queued; a fresh sink is created
                // on the next Play
                if let Some(s) = sink.take() {
                    s.stop();
                }
            }
            SinkCommand::Shutdown => break,
        }
    }

    info!("Playback thread exited");
}
