use thiserror::Error;

use crate::config::prompt::PromptError;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API key is required for the generation client")]
    MissingApiKey,

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prompt configuration error: {0}")]
    Prompt(#[from] PromptError),
}

impl GenerationError {
    /// Failures of the call itself, as opposed to unusable output.
    pub fn is_transport(&self) -> bool {
        matches!(self, GenerationError::Network(_) | GenerationError::Api { .. })
    }
}
