use super::state::AppState;
use crate::audio::{
    AudioCaptureEngine, CaptureBackendFactory, CaptureConfig, CaptureSource, RecorderConfig,
};
use crate::playback::{PlaybackConfig, PlaybackScheduler, RodioSink};
use crate::session::{
    ConversationSession, ConversationTurn, InterviewContext, OrchestratorConfig, SessionDeps,
    SessionOrchestrator,
};
use crate::transport::{RealtimeTransportClient, TransportConfig};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartInterviewRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Interview context supplied by case generation
    pub context: InterviewContext,
}

#[derive(Debug, Serialize)]
pub struct StartInterviewResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopInterviewResponse {
    pub session_id: String,
    pub status: String,
    pub session: ConversationSession,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub connected: bool,
    pub listening: bool,
    pub ai_speaking: bool,
    pub screen_recording: bool,
    pub turns_so_far: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /interviews/start
/// Connect a new live interview session and start listening
pub async fn start_interview(
    State(state): State<AppState>,
    Json(req): Json<StartInterviewRequest>,
) -> impl IntoResponse {
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("interview-{}", uuid::Uuid::new_v4()));

    info!("Starting interview session: {}", session_id);

    {
        let sessions = state.sessions.read().await;
        if sessions.contains_key(&session_id) {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("Session {} is already live", session_id),
                }),
            )
                .into_response();
        }
    }

    let orchestrator = match build_orchestrator(&state, &session_id, req.context) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            error!("Failed to assemble session: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to assemble session: {}", e),
                }),
            )
                .into_response();
        }
    };

    if let Err(e) = orchestrator.start().await {
        error!("Failed to start session: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to start session: {}", e),
            }),
        )
            .into_response();
    }

    if let Err(e) = orchestrator.start_listening().await {
        error!("Failed to start listening: {}", e);
        let _ = orchestrator.end_session().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to start listening: {}", e),
            }),
        )
            .into_response();
    }

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), orchestrator);
    }

    info!("Interview session {} is live", session_id);

    (
        StatusCode::OK,
        Json(StartInterviewResponse {
            session_id: session_id.clone(),
            status: "live".to_string(),
            message: format!("Interview session {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /interviews/stop/:session_id
/// End a session and hand back the finished conversation
pub async fn stop_interview(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping interview session: {}", session_id);

    let orchestrator = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match orchestrator {
        Some(orchestrator) => match orchestrator.end_session().await {
            Ok(session) => (
                StatusCode::OK,
                Json(StopInterviewResponse {
                    session_id,
                    status: "ended".to_string(),
                    session,
                }),
            )
                .into_response(),
            Err(e) => {
                error!("Failed to end session: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("Failed to end session: {}", e),
                    }),
                )
                    .into_response()
            }
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /interviews/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(orchestrator) => {
            let snapshot = orchestrator.conversation_data();
            (
                StatusCode::OK,
                Json(SessionStatusResponse {
                    session_id,
                    connected: orchestrator.is_connected(),
                    listening: orchestrator.is_listening(),
                    ai_speaking: orchestrator.is_ai_speaking(),
                    screen_recording: orchestrator.is_screen_recording(),
                    turns_so_far: snapshot.turns.len(),
                }),
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /interviews/:session_id/transcript
/// Turns accumulated so far
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(orchestrator) => {
            let turns: Vec<ConversationTurn> = orchestrator.conversation_data().turns;
            (StatusCode::OK, Json(turns)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// ============================================================================
// Assembly
// ============================================================================

fn build_orchestrator(
    state: &AppState,
    session_id: &str,
    context: InterviewContext,
) -> anyhow::Result<SessionOrchestrator> {
    let config = &state.config;

    let url = config.live_api_url()?;
    let (client, transport_events) = RealtimeTransportClient::new(TransportConfig { url });

    let capture_config = CaptureConfig {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
        ..CaptureConfig::default()
    };
    let backend = CaptureBackendFactory::create(CaptureSource::Microphone, capture_config.clone())?;
    let capture = AudioCaptureEngine::new(backend, capture_config);

    let sink = RodioSink::new()?;
    let scheduler = PlaybackScheduler::new(
        Arc::new(sink),
        PlaybackConfig {
            sample_rate: config.audio.playback_sample_rate,
            ..PlaybackConfig::default()
        },
    );

    if config.screen.enabled {
        // Frame sources are injected by embedding applications; the service
        // has no display of its own to rasterize
        warn!("screen.enabled is set but no frame source exists in service mode; ignoring");
    }

    let recorder = config.recording.enabled.then(|| RecorderConfig {
        chunk_duration_secs: config.recording.chunk_duration_secs,
        output_dir: PathBuf::from(&config.recording.recordings_path),
        session_id: session_id.to_string(),
    });

    Ok(SessionOrchestrator::new(
        context,
        SessionDeps {
            transport: Arc::new(client),
            transport_events,
            capture,
            scheduler,
            screen: None,
        },
        OrchestratorConfig {
            model: config.live_api.model.clone(),
            voice: config.live_api.voice.clone(),
            screen_capture_interval_ms: config.screen.capture_interval_ms,
            recorder,
        },
    ))
}
