//! Live interview session management
//!
//! This module owns the conversation side of the engine:
//! - The interview context and the system instruction built from it
//! - The conversation aggregate (turns, screen captures, analytics)
//! - The typed event bus exposed to the rest of the application
//! - The orchestrator composing capture, transport, and playback

mod context;
mod conversation;
mod events;
mod orchestrator;

pub use context::{ContextPatch, InterviewContext, Question};
pub use conversation::{
    ConversationSession, ConversationTurn, Role, SessionAnalytics, TurnContent, TurnMetadata,
    TurnState,
};
pub use events::{EventBus, EventKind, HandlerId, SessionEvent};
pub use orchestrator::{OrchestratorConfig, SessionDeps, SessionOrchestrator};
