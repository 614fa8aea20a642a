use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("HuggingFace API error: {0}")]
    HuggingFace(#[from] hf_hub::api::sync::ApiError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    /// The embedding model is unavailable or the start-up index build has not finished.
    #[error("Model not initialized")]
    NotInitialized,

    #[error("Image index not found. Please index images first.")]
    IndexMissing,

    #[error("Index mismatch: {vectors} embeddings but {paths} paths. Please reindex.")]
    IndexInconsistent { vectors: usize, paths: usize },

    #[error("No valid images found in index. Please reindex.")]
    NoValidImages,

    #[error("Access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("Image not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
