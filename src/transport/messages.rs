use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Outbound frames
// ============================================================================

/// Setup frame, sent once immediately after the channel opens
#[derive(Debug, Clone, Serialize)]
pub struct SetupFrame {
    pub setup: SetupPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker object; presence enables the transcription stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

/// Realtime input frame carrying one or more audio chunks
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputFrame {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

/// Client text content with an explicit turn boundary flag
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentFrame {
    pub client_content: ClientContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

// ============================================================================
// Inbound frames
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    /// Setup acknowledgement; an object or `true` depending on server version
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub model_turn: Option<Content>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

// ============================================================================
// Demultiplexed events
// ============================================================================

/// Classified inbound traffic, one variant per observable transport event
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Setup acknowledged; the channel is fully open
    Connected,
    Disconnected,
    /// The user began talking over the assistant; buffered playback must be
    /// discarded, not drained
    Interrupted,
    /// The assistant finished its logical turn; buffered playback should
    /// still drain
    TurnComplete,
    UserTranscript { text: String, timestamp: DateTime<Utc> },
    AiTranscript { text: String, timestamp: DateTime<Utc> },
    /// Raw PCM16 audio payload to play
    Audio { pcm: Vec<u8>, mime_type: String },
    /// Non-audio text fragment
    Text { content: String },
    Error { message: String },
}

/// Classify one server frame into zero or more transport events.
///
/// Interruption leads so barge-in handling is never queued behind content
/// from the same frame; the turn boundary trails for the same reason.
pub fn demux(frame: ServerFrame) -> Vec<TransportEvent> {
    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(TransportEvent::Connected);
    }

    let Some(content) = frame.server_content else {
        return events;
    };

    if content.interrupted {
        events.push(TransportEvent::Interrupted);
    }

    if let Some(t) = content.input_transcription {
        if !t.text.is_empty() {
            events.push(TransportEvent::UserTranscript {
                text: t.text,
                timestamp: Utc::now(),
            });
        }
    }

    if let Some(t) = content.output_transcription {
        if !t.text.is_empty() {
            events.push(TransportEvent::AiTranscript {
                text: t.text,
                timestamp: Utc::now(),
            });
        }
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                match base64::engine::general_purpose::STANDARD.decode(&inline.data) {
                    Ok(pcm) => events.push(TransportEvent::Audio {
                        pcm,
                        mime_type: inline.mime_type,
                    }),
                    Err(e) => {
                        // One undecodable part must not kill the stream
                        warn!("Failed to decode inline audio payload: {}", e);
                    }
                }
            } else if let Some(text) = part.text {
                events.push(TransportEvent::Text { content: text });
            }
        }
    }

    if content.turn_complete {
        events.push(TransportEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_frame_serializes_camel_case() {
        let frame = SetupFrame {
            setup: SetupPayload {
                model: "models/test".to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: "Puck".to_string(),
                            },
                        },
                    }),
                },
                system_instruction: Some(Content::user_text("hello")),
                input_audio_transcription: Some(TranscriptionConfig::default()),
                output_audio_transcription: Some(TranscriptionConfig::default()),
            },
        };

        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["setup"]["model"], "models/test");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert!(json["setup"]["inputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_wraps_media_chunks() {
        let frame = RealtimeInputFrame {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: "audio/pcm;rate=16000".to_string(),
                    data: "AAAA".to_string(),
                }],
            },
        };

        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(
            json["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
    }

    #[test]
    fn demux_setup_ack() {
        let frame: ServerFrame = serde_json::from_str(r#"{"setupComplete": true}"#).unwrap();
        let events = demux(frame);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransportEvent::Connected));
    }

    #[test]
    fn demux_audio_and_turn_complete_in_order() {
        let pcm: Vec<u8> = vec![0, 1, 2, 3];
        let data = base64::engine::general_purpose::STANDARD.encode(&pcm);
        let raw = format!(
            r#"{{"serverContent": {{"turnComplete": true, "modelTurn": {{"parts": [{{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{data}"}}}}]}}}}}}"#
        );

        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        let events = demux(frame);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], TransportEvent::Audio { pcm: p, .. } if *p == pcm));
        assert!(matches!(events[1], TransportEvent::TurnComplete));
    }

    #[test]
    fn demux_interrupted_leads() {
        let raw = r#"{"serverContent": {"interrupted": true, "outputTranscription": {"text": "cut"}}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        let events = demux(frame);

        assert!(matches!(events[0], TransportEvent::Interrupted));
        assert!(matches!(&events[1], TransportEvent::AiTranscript { text, .. } if text == "cut"));
    }

    #[test]
    fn demux_transcriptions() {
        let raw = r#"{"serverContent": {"inputTranscription": {"text": "hello"}, "outputTranscription": {"text": "hi"}}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        let events = demux(frame);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], TransportEvent::UserTranscript { text, .. } if text == "hello"));
        assert!(matches!(&events[1], TransportEvent::AiTranscript { text, .. } if text == "hi"));
    }

    #[test]
    fn demux_empty_frame_produces_nothing() {
        let frame: ServerFrame = serde_json::from_str(r#"{}"#).unwrap();
        assert!(demux(frame).is_empty());
    }
}
