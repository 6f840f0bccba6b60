//! Error types for the audience-sync library.
//!
//! This module provides custom error types using `thiserror` so that callers can
//! tell a bad record apart from a broken store or a rejected API call.

use thiserror::Error;

/// Errors that can occur while importing, segmenting or syncing customers.
#[derive(Error, Debug)]
pub enum AudienceError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed export file
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Transport failure talking to the audience service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The audience service answered with a non-success status
    #[error("Audience API returned {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the provider
        body: String,
    },

    /// A customer's last-activity date could not be parsed
    #[error("Invalid date for customer {id}: {value:?}")]
    InvalidDate {
        /// Customer key
        id: String,
        /// The raw value that failed to parse
        value: String,
    },

    /// Export file without a required column
    #[error("Invalid export {file}: {reason}")]
    InvalidExport {
        /// File name within the drop
        file: String,
        /// What is wrong with it
        reason: String,
    },

    /// Audience already exists on create, or is missing on delete/add/remove
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Lists were requested before any sort ran
    #[error("Segment lists not computed yet: run add_sort or add_remove_sort first")]
    NotComputed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for Result with `AudienceError`
pub type Result<T> = std::result::Result<T, AudienceError>;
