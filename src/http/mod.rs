//! HTTP API server for external control
//!
//! This module provides a REST API for controlling voice sessions:
//! - POST /voice/sessions - Start a session
//! - POST /voice/sessions/:id/stop - Stop a session
//! - POST /voice/sessions/:id/mute - Toggle mute
//! - GET /voice/sessions/:id/status - Query state and stats
//! - GET /voice/sessions/:id/transcript - Get the most recent transcript lines
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
