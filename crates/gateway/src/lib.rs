//! Antrian Gateway Library
//!
//! Chat-driven patient registration for a clinic queue: a questionnaire over
//! a chat transport, gapless daily ticket numbers, ticket images, and an
//! operator API for the transport connection.

pub mod config;
pub mod conversation;
pub mod error;
pub mod intake;
pub mod issuer;
pub mod lifecycle;
pub mod render;
pub mod routes;
pub mod sequence;
pub mod state;
pub mod store;
pub mod transport;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
