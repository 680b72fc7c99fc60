//! Error types for nest-refresher

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NestError {
    /// Polygon is unparsable or degenerate. Absorbed into the `invalid`
    /// classification by the refresher.
    #[error("Invalid geometry: {0}")]
    GeometryInvalid(String),

    #[error("Failed to serialize geometry: {0}")]
    GeometrySerialize(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Failed to persist nest {nest_id}: {message}")]
    Persistence { nest_id: i64, message: String },

    #[error("Nest not found: {0}")]
    NestNotFound(i64),

    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NestError>;
