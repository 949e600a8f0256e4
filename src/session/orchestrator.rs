use super::context::{ContextPatch, InterviewContext};
use super::conversation::{ConversationSession, Role};
use super::events::{EventBus, SessionEvent};
use crate::audio::recorder::{spawn_recorder, ChunkMetadata, RecorderConfig};
use crate::audio::{AudioCaptureEngine, PcmBlock};
use crate::playback::PlaybackScheduler;
use crate::screencapture::{ScreenCapture, ScreenCaptureEngine};
use crate::transport::{
    Content, GenerationConfig, MediaChunk, Part, PrebuiltVoiceConfig, SetupPayload, SpeechConfig,
    Transport, TranscriptionConfig, TransportEvent, VoiceConfig,
};
use anyhow::{Context as _, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Session-level settings not derivable from the interview context
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub voice: String,
    pub screen_capture_interval_ms: u64,
    /// Archive microphone audio to WAV chunks when set
    pub recorder: Option<RecorderConfig>,
}

/// Constructor-injected collaborators, so sessions coexist and every seam
/// is mockable.
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub transport_events: mpsc::Receiver<TransportEvent>,
    pub capture: AudioCaptureEngine,
    pub scheduler: PlaybackScheduler,
    pub screen: Option<ScreenCaptureEngine>,
}

/// Composes capture, transport, playback, and the conversation record for
/// one live interview session.
///
/// Turn-taking state is derived from transport events, never local timers:
/// inbound audio marks the assistant speaking and cancels any pending
/// graceful finish; `turn-complete` drains playback and only then flips
/// ai-speaking off; `interrupted` hard-stops playback and flips it off
/// immediately.
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    context: StdMutex<InterviewContext>,
    transport: Arc<dyn Transport>,
    transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    capture: Arc<AudioCaptureEngine>,
    scheduler: Arc<PlaybackScheduler>,
    screen: Option<Arc<ScreenCaptureEngine>>,
    bus: Arc<EventBus>,
    session: Arc<StdMutex<ConversationSession>>,
    is_listening: Arc<AtomicBool>,
    ai_speaking: Arc<AtomicBool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
    screen_task: Mutex<Option<JoinHandle<()>>>,
    recorder_tx: Mutex<Option<mpsc::Sender<PcmBlock>>>,
    recorder_handle: Mutex<Option<JoinHandle<Result<Vec<ChunkMetadata>>>>>,
}

impl SessionOrchestrator {
    pub fn new(context: InterviewContext, deps: SessionDeps, config: OrchestratorConfig) -> Self {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        info!(
            "Creating interview session {} for {}",
            session_id, context.interview_id
        );

        let session = ConversationSession::new(session_id, config.model.clone());

        Self {
            config,
            context: StdMutex::new(context),
            transport: deps.transport,
            transport_events: Mutex::new(Some(deps.transport_events)),
            capture: Arc::new(deps.capture),
            scheduler: Arc::new(deps.scheduler),
            screen: deps.screen.map(Arc::new),
            bus: Arc::new(EventBus::new()),
            session: Arc::new(StdMutex::new(session)),
            is_listening: Arc::new(AtomicBool::new(false)),
            ai_speaking: Arc::new(AtomicBool::new(false)),
            event_task: Mutex::new(None),
            forward_task: Mutex::new(None),
            screen_task: Mutex::new(None),
            recorder_tx: Mutex::new(None),
            recorder_handle: Mutex::new(None),
        }
    }

    /// Connect the live channel (setup + ack) and begin routing inbound
    /// events. Fails if the channel cannot be established; no retry here.
    pub async fn start(&self) -> Result<()> {
        let setup = self.build_setup();

        self.transport
            .connect(setup)
            .await
            .context("Failed to establish live channel")?;

        let events = {
            let mut slot = self.transport_events.lock().await;
            slot.take().context("Session already started")?
        };

        let task = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.bus),
            Arc::clone(&self.session),
            Arc::clone(&self.ai_speaking),
        ));
        {
            let mut slot = self.event_task.lock().await;
            *slot = Some(task);
        }

        if let Some(screen) = &self.screen {
            self.start_screen_capture(screen).await?;
        }

        info!("Interview session started");

        Ok(())
    }

    /// Begin forwarding microphone audio to the transport.
    ///
    /// The gate is the `is_listening` flag, not capture lifetime: capture
    /// can keep running while muted from the transport's perspective.
    pub async fn start_listening(&self) -> Result<()> {
        if self.is_listening.load(Ordering::SeqCst) {
            warn!("Already listening");
            return Ok(());
        }

        let tee = self.ensure_recorder().await?;

        let (chunk_tx, mut chunk_rx) = mpsc::channel(100);
        self.capture
            .start(chunk_tx, tee)
            .await
            .context("Failed to start audio capture")?;

        self.is_listening.store(true, Ordering::SeqCst);

        let transport = Arc::clone(&self.transport);
        let is_listening = Arc::clone(&self.is_listening);

        let task = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if !is_listening.load(Ordering::SeqCst) {
                    continue;
                }
                let media = MediaChunk {
                    mime_type: chunk.mime_type,
                    data: chunk.data,
                };
                if let Err(e) = transport.send_audio(media).await {
                    error!("Failed to forward audio chunk: {}", e);
                }
            }
        });
        {
            let mut slot = self.forward_task.lock().await;
            *slot = Some(task);
        }

        self.bus.emit(&SessionEvent::ListeningStart);

        Ok(())
    }

    /// Stop forwarding and release the microphone. Idempotent.
    pub async fn stop_listening(&self) -> Result<()> {
        if !self.is_listening.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.capture
            .stop()
            .await
            .context("Failed to stop audio capture")?;

        {
            let mut slot = self.forward_task.lock().await;
            if let Some(task) = slot.take() {
                if let Err(e) = task.await {
                    error!("Audio forwarding task panicked: {}", e);
                }
            }
        }

        self.bus.emit(&SessionEvent::ListeningStop);

        Ok(())
    }

    /// Merge a context patch and tell the model about the change without
    /// ending anyone's turn.
    pub async fn update_context(&self, patch: ContextPatch) -> Result<()> {
        let note = {
            let mut context = self.context.lock().expect("context lock poisoned");
            context.apply(patch);
            context.update_note()
        };

        if self.transport.is_connected() {
            self.transport
                .send_text(&note, false)
                .await
                .context("Failed to send context update")?;
        }

        Ok(())
    }

    /// Tear everything down and return the finished conversation.
    pub async fn end_session(&self) -> Result<ConversationSession> {
        info!("Ending interview session");

        if let Err(e) = self.stop_listening().await {
            warn!("Error stopping capture during teardown: {}", e);
        }

        if let Some(screen) = &self.screen {
            if let Err(e) = screen.stop().await {
                warn!("Error stopping screen capture during teardown: {}", e);
            }
        }
        {
            let mut slot = self.screen_task.lock().await;
            if let Some(task) = slot.take() {
                task.abort();
            }
        }

        if let Err(e) = self.scheduler.stop().await {
            warn!("Error stopping playback during teardown: {}", e);
        }
        self.ai_speaking.store(false, Ordering::SeqCst);

        if let Err(e) = self.transport.disconnect().await {
            warn!("Error disconnecting transport during teardown: {}", e);
        }

        {
            let mut slot = self.event_task.lock().await;
            if let Some(task) = slot.take() {
                task.abort();
            }
        }

        self.finish_recorder().await;

        let session = {
            let mut session = self.session.lock().expect("session lock poisoned");
            session.finalize(Utc::now());
            session.clone()
        };

        info!(
            "Session {} ended: {} turns, {} screen captures",
            session.session_id,
            session.turns.len(),
            session.screen_captures.len()
        );

        Ok(session)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_listening(&self) -> bool {
        self.is_listening.load(Ordering::SeqCst)
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking.load(Ordering::SeqCst)
    }

    pub fn is_screen_recording(&self) -> bool {
        self.screen.as_ref().is_some_and(|s| s.is_active())
    }

    /// Snapshot of the conversation so far. The live aggregate itself is
    /// only released by `end_session`.
    pub fn conversation_data(&self) -> ConversationSession {
        self.session.lock().expect("session lock poisoned").clone()
    }

    pub fn interview_context(&self) -> InterviewContext {
        self.context.lock().expect("context lock poisoned").clone()
    }

    /// Subscribe/emit surface for external collaborators
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn build_setup(&self) -> SetupPayload {
        let instruction = {
            let context = self.context.lock().expect("context lock poisoned");
            context.system_instruction()
        };

        SetupPayload {
            model: self.config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.config.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(instruction),
                    inline_data: None,
                }],
            }),
            input_audio_transcription: Some(TranscriptionConfig::default()),
            output_audio_transcription: Some(TranscriptionConfig::default()),
        }
    }

    async fn start_screen_capture(&self, screen: &Arc<ScreenCaptureEngine>) -> Result<()> {
        let (capture_tx, mut capture_rx) = mpsc::channel::<ScreenCapture>(16);

        screen
            .start(capture_tx, self.config.screen_capture_interval_ms)
            .await
            .context("Failed to start screen capture")?;

        let session = Arc::clone(&self.session);
        let bus = Arc::clone(&self.bus);

        let task = tokio::spawn(async move {
            while let Some(capture) = capture_rx.recv().await {
                let event = SessionEvent::ScreenCaptureTaken {
                    id: capture.id.clone(),
                    width: capture.width,
                    height: capture.height,
                };
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.add_screen_capture(capture);
                }
                bus.emit(&event);
            }
        });
        {
            let mut slot = self.screen_task.lock().await;
            *slot = Some(task);
        }

        Ok(())
    }

    async fn ensure_recorder(&self) -> Result<Option<mpsc::Sender<PcmBlock>>> {
        let Some(config) = &self.config.recorder else {
            return Ok(None);
        };

        let mut tx_slot = self.recorder_tx.lock().await;
        if tx_slot.is_none() {
            let (tx, handle) = spawn_recorder(config.clone())?;
            *tx_slot = Some(tx);
            let mut handle_slot = self.recorder_handle.lock().await;
            *handle_slot = Some(handle);
        }

        Ok(tx_slot.clone())
    }

    async fn finish_recorder(&self) {
        {
            let mut tx_slot = self.recorder_tx.lock().await;
            tx_slot.take();
        }

        let handle = {
            let mut handle_slot = self.recorder_handle.lock().await;
            handle_slot.take()
        };

        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(chunks)) => info!("Archived {} audio chunks", chunks.len()),
                Ok(Err(e)) => error!("Session archival failed: {}", e),
                Err(e) => error!("Recorder task panicked: {}", e),
            }
        }
    }
}

/// Route demultiplexed transport events into playback, the conversation
/// record, and the event bus. All session mutation happens here, one event
/// at a time.
async fn run_event_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    scheduler: Arc<PlaybackScheduler>,
    bus: Arc<EventBus>,
    session: Arc<StdMutex<ConversationSession>>,
    ai_speaking: Arc<AtomicBool>,
) {
    info!("Transport event loop started");

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                bus.emit(&SessionEvent::Connected);
            }
            TransportEvent::Disconnected => {
                bus.emit(&SessionEvent::Disconnected);
            }
            TransportEvent::Audio { pcm, mime_type } => {
                if !ai_speaking.swap(true, Ordering::SeqCst) {
                    bus.emit(&SessionEvent::AiSpeakingStart);
                }
                // New audio cancels any wind-down in progress (model
                // self-correction after a turn-complete)
                scheduler.reset_finishing();
                scheduler.stream_audio(&pcm);
                bus.emit(&SessionEvent::AudioReceived { pcm, mime_type });
            }
            TransportEvent::TurnComplete => {
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.complete_turn();
                }
                bus.emit(&SessionEvent::TurnComplete);

                // ai-speaking-stop must wait for the drain: it never fires
                // before the last queued frame has been scheduled
                let ai_speaking = Arc::clone(&ai_speaking);
                let bus = Arc::clone(&bus);
                scheduler.finish_playback(move || {
                    if ai_speaking.swap(false, Ordering::SeqCst) {
                        bus.emit(&SessionEvent::AiSpeakingStop);
                    }
                });
            }
            TransportEvent::Interrupted => {
                // Barge-in: the prior utterance is void, cut it now
                if let Err(e) = scheduler.stop().await {
                    error!("Failed to stop playback on interruption: {}", e);
                }
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.interrupt_turn();
                }
                if ai_speaking.swap(false, Ordering::SeqCst) {
                    bus.emit(&SessionEvent::AiSpeakingStop);
                }
                bus.emit(&SessionEvent::Interrupted);
            }
            TransportEvent::UserTranscript { text, timestamp } => {
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.append_transcript(Role::User, &text, timestamp);
                }
                bus.emit(&SessionEvent::UserTranscript { text, timestamp });
            }
            TransportEvent::AiTranscript { text, timestamp } => {
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.append_transcript(Role::Assistant, &text, timestamp);
                }
                bus.emit(&SessionEvent::AiTranscript { text, timestamp });
            }
            TransportEvent::Text { content } => {
                {
                    let mut session = session.lock().expect("session lock poisoned");
                    session.append_text(Role::Assistant, &content, Utc::now());
                }
                bus.emit(&SessionEvent::TextReceived { content });
            }
            TransportEvent::Error { message } => {
                error!("Transport error: {}", message);
                bus.emit(&SessionEvent::Error { message });
            }
        }
    }

    info!("Transport event loop stopped");
}
