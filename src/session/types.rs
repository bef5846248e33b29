//! Session types.

use serde::{Deserialize, Serialize};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System/persona instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
}

impl Role {
    /// String representation used on the completion API wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-user persona and sampling overrides.
///
/// Every field is optional; unset fields fall back to the configured
/// defaults when the prompt is assembled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Character name override.
    pub name: Option<String>,

    /// Character age override.
    pub age: Option<u32>,

    /// User-appended description fragment. The base description is never
    /// overwritten, only extended by this.
    pub additional_description: Option<String>,

    /// Full system prompt template override.
    pub system_prompt: Option<String>,

    /// Sampling overrides.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl UserProfile {
    /// Compose the effective description: base plus the appended fragment.
    pub fn full_description(&self, base: &str) -> String {
        match self.additional_description.as_deref() {
            Some(extra) if !extra.is_empty() => format!("{base} {extra}").trim().to_string(),
            _ => base.to_string(),
        }
    }
}

/// Process-lifetime state for one user: bounded history plus overrides.
#[derive(Debug, Clone, Default)]
pub struct UserSession {
    /// Conversation history, oldest first. Always whole user/assistant pairs.
    pub history: Vec<ChatMessage>,

    /// Persona and sampling overrides.
    pub profile: UserProfile,

    /// Selected image-generation preset, by name.
    pub lora_selection: Option<String>,
}
