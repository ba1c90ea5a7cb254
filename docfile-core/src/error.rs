// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Duplicate _id: {0}")]
    DuplicateId(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Collection file corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, DocFileError>;
