//! Error types for Cradle Forecast
//!
//! Forecast operations themselves never fail; errors only arise while ingesting
//! snapshots, profiles and configuration.

use thiserror::Error;

/// Errors that can occur while loading inputs for the engine
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse snapshot: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid event {id}: {reason}")]
    InvalidEvent { id: String, reason: String },

    #[error("Invalid profile for subject {subject}: {reason}")]
    InvalidProfile { subject: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
