//! Error types for persona-bot.

use thiserror::Error;

/// Result type alias using the bot error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the bot core.
#[derive(Error, Debug)]
pub enum Error {
    /// Completion API failure (connect, timeout, malformed response).
    /// Recovered locally and surfaced to the user as a generic apology.
    #[error("completion provider error: {0}")]
    Provider(String),

    /// A persona template referenced a placeholder that has no value.
    #[error("template error: unknown placeholder '{{{0}}}'")]
    Template(String),

    /// User-input validation failure. Surfaced as a corrective message,
    /// no state is mutated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Image-generation subprocess failed.
    #[error("image generation failed: {0}")]
    ImageGen(String),

    /// Preset registry failure (read-side; the registry itself keeps
    /// last-known-good on load failures).
    #[error("preset registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
