//! HTTP control plane for the rest of the product
//!
//! This module provides a REST API for driving live interview sessions:
//! - POST /interviews/start - Connect a session and start listening
//! - POST /interviews/stop/:id - End a session, returning the conversation
//! - GET /interviews/:id/status - Query live session state
//! - GET /interviews/:id/transcript - Turns accumulated so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
