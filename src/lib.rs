pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod playback;
pub mod screencapture;
pub mod session;
pub mod transport;

pub use audio::{
    AudioCaptureEngine, AudioFile, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    CaptureSource, EncodedChunk, PcmBlock, RecorderConfig, SessionRecorder,
};
pub use config::Config;
pub use error::EngineError;
pub use http::{create_router, AppState};
pub use playback::{PlaybackConfig, PlaybackScheduler, PlaybackSink, PlaybackState, RodioSink};
pub use screencapture::{FrameSource, RawFrame, ScreenCapture, ScreenCaptureEngine};
pub use session::{
    ConversationSession, ConversationTurn, EventBus, EventKind, InterviewContext,
    OrchestratorConfig, Question, Role, SessionAnalytics, SessionDeps, SessionEvent,
    SessionOrchestrator,
};
pub use transport::{
    ConnectionState, MediaChunk, RealtimeTransportClient, SetupPayload, Transport,
    TransportConfig, TransportEvent,
};
