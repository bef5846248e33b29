//! Completion backends.

pub mod ollama;

pub use ollama::OllamaProvider;

use crate::error::Result;
use crate::session::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fixed sampling parameters sent with every completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f64,

    /// Maximum new tokens per reply.
    #[serde(default = "default_num_predict")]
    pub num_predict: i64,
}

fn default_temperature() -> f64 {
    0.75
}

fn default_top_p() -> f64 {
    0.6
}

fn default_repeat_penalty() -> f64 {
    1.08
}

fn default_num_predict() -> i64 {
    768
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            num_predict: default_num_predict(),
        }
    }
}

/// A chat completion backend.
///
/// Implementations stream partial fragments internally but hand back the
/// fully concatenated reply; incremental delivery to the requester is not
/// part of this design.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Run one completion over an ordered message list.
    async fn chat(&self, messages: &[ChatMessage], options: &SamplingOptions) -> Result<String>;
}
