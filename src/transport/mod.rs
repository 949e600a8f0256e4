pub mod client;
pub mod messages;

pub use client::{ConnectionState, RealtimeTransportClient, Transport, TransportConfig};
pub use messages::{
    Content, GenerationConfig, MediaChunk, Part, PrebuiltVoiceConfig, SetupPayload, SpeechConfig,
    TranscriptionConfig, TransportEvent, VoiceConfig,
};
