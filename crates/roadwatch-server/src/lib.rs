//! # roadwatch-server
//!
//! Axum HTTP + WebSocket server for per-session video processing.
//!
//! - `POST /upload` stores a video and hands back a session id and path
//! - `GET /ws/process` claims that upload and streams one JSON message per
//!   processed frame until the video ends, the client leaves, processing
//!   fails, or the server shuts down
//! - Every session owns its temp file; it is deleted exactly once

#![deny(unsafe_code)]

pub mod coordinator;
pub mod error;
pub mod reaper;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod upload;
pub mod websocket;

pub use coordinator::{SessionCoordinator, SessionOutcome, SessionReport};
pub use error::{ApiError, ClaimError, ServerError};
pub use server::{build_router, start, AppState, ServerDeps, ServerHandle};
pub use shutdown::{shutdown_sweep, ShutdownCoordinator, SweepReport};
pub use store::{SessionStore, SessionTask};
pub use websocket::{ConnectionHandle, Outbound};
