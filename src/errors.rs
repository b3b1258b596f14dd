//! Unified application error type.
//! All modules (db, core, remote, cli) return AppError to keep the error
//! handling consistent and easy to manage.
//!
//! Capture rejections are not errors: see `core::sampler::RejectReason`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // ---------------------------
    // IO
    // ---------------------------
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ---------------------------
    // Database-related
    // ---------------------------
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Database migration error: {0}")]
    Migration(String),

    /// Local storage unavailable while persisting a captured sample.
    #[error("Queue persist failure: {0}")]
    QueuePersistFailure(String),

    // ---------------------------
    // Session lifecycle
    // ---------------------------
    #[error("Session state conflict: {0}")]
    SessionStateConflict(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No active session for employee {0}")]
    NoActiveSession(String),

    // ---------------------------
    // Sync
    // ---------------------------
    #[error("Transient upload failure: {0}")]
    UploadTransient(String),

    #[error("Upload schema mismatch: {0}")]
    UploadSchemaMismatch(String),

    #[error("Permanent upload failure: {0}")]
    UploadPermanent(String),

    // ---------------------------
    // Parsing errors
    // ---------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // ---------------------------
    // Config errors
    // ---------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // ---------------------------
    // Generic fallback
    // ---------------------------
    #[error("Internal error: {0}")]
    Other(String),
}

pub type AppResult<T> = Result<T, AppError>;
