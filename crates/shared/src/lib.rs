//! Antrian Shared Types and Utilities
//!
//! This crate contains the queue record, connection status and database helpers
//! shared by the gateway and its tooling.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
