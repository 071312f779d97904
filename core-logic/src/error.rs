//! # Core Error Types
//!
//! Centralized error definitions shared by the workspace crates.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid proxy URL format: '{url}'")]
    InvalidProxyUrl { url: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Parse error in {path}: {msg}")]
    ParseError { path: String, msg: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Persistent store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Failed to read store at {path}: {msg}")]
    Read { path: String, msg: String },

    #[error("Failed to write store at {path}: {msg}")]
    Write { path: String, msg: String },

    #[error("Corrupt store at {path}: {msg}")]
    Corrupt { path: String, msg: String },
}

/// Transport-level failures. They never propagate as `Err`: transports turn
/// them into a status-0 response carrying the message.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request timeout after {timeout_ms}ms to {endpoint}")]
    Timeout { timeout_ms: u64, endpoint: String },

    #[error("Connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Transport helper failed: {reason}")]
    HelperFailed { reason: String },
}
