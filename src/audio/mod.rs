pub mod capture;
pub mod engine;
pub mod file;
pub mod recorder;

pub use capture::{
    CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureSource, MicrophoneBackend,
    PcmBlock,
};
pub use engine::{AudioCaptureEngine, EncodedChunk};
pub use file::{AudioFile, FileBackend};
pub use recorder::{ChunkMetadata, RecorderConfig, SessionRecorder};
