//! `/ws/process`: start-message handshake, outbound writer and liveness.

pub mod connection;
pub mod session;

pub use connection::{ConnectionHandle, Outbound};
pub use session::{handle_process_socket, ws_process_handler};
