//! WebSocket support for live connection status
//!
//! Operators watching the gateway receive the current connection status as soon
//! as they connect and every transition after that, including the credential
//! payload while the transport waits for a scan.
//!
//! # Architecture
//!
//! - **Connection**: An authenticated operator socket
//! - **State**: Registry of open sockets shared across handlers
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod state;

pub use handler::ws_handler;
pub use state::WebSocketState;
