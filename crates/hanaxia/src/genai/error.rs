//! Generative-AI error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenAiError {
    #[error("no API key configured for the generative AI service")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("no video URI returned")]
    MissingVideo,
}
