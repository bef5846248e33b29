//! Ollama-compatible completion client.
//!
//! Talks to `POST {base}/api/chat` with `stream: true` and concatenates the
//! NDJSON fragment stream into one reply string. The whole call runs under an
//! explicit timeout; expiry surfaces as a provider failure like any other
//! transport error.

use super::{CompletionProvider, SamplingOptions};
use crate::error::{Error, Result};
use crate::session::ChatMessage;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for a local Ollama-compatible inference endpoint.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    request_timeout: Duration,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    top_p: f64,
    repeat_penalty: f64,
    num_predict: i64,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    /// Ollama reports in-band errors as `{"error": "..."}` fragments.
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - e.g. `http://127.0.0.1:11434`
    /// * `model` - model name requested on every call
    /// * `request_timeout` - hard cap for one whole completion
    pub fn new(base_url: &str, model: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            request_timeout,
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    async fn chat_inner(
        &self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
    ) -> Result<String> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: true,
            options: OllamaOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                repeat_penalty: options.repeat_penalty,
                num_predict: options.num_predict,
            },
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "API error ({}): {body}",
                status.as_u16()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| Error::Provider(format!("stream read failed: {e}")))?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if Self::consume_line(&line, &mut reply)? {
                    return Ok(reply);
                }
            }
        }

        // Trailing fragment without a final newline
        if !buffer.is_empty() {
            Self::consume_line(&buffer, &mut reply)?;
        }
        Ok(reply)
    }

    /// Parse one NDJSON line into the reply. Returns true once the end
    /// marker is seen.
    fn consume_line(line: &[u8], reply: &mut String) -> Result<bool> {
        let text = std::str::from_utf8(line)
            .map_err(|e| Error::Provider(format!("malformed fragment: {e}")))?
            .trim();
        if text.is_empty() {
            return Ok(false);
        }

        let chunk: OllamaStreamChunk = serde_json::from_str(text)
            .map_err(|e| Error::Provider(format!("malformed fragment: {e}")))?;

        if let Some(err) = chunk.error {
            return Err(Error::Provider(err));
        }
        if let Some(message) = chunk.message {
            reply.push_str(&message.content);
        }
        Ok(chunk.done)
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, messages: &[ChatMessage], options: &SamplingOptions) -> Result<String> {
        match tokio::time::timeout(self.request_timeout, self.chat_inner(messages, options)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Provider(format!(
                "request timed out after {:?}",
                self.request_timeout
            ))),
        }
    }
}
