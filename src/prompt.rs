//! Prompt assembly.
//!
//! A prompt is the persona system message, the session history oldest-first,
//! then the new user turn.

use crate::config::PersonaConfig;
use crate::error::Result;
use crate::persona;
use crate::session::{ChatMessage, UserSession};

/// Build the ordered message list for one completion call.
pub fn build_prompt(
    cfg: &PersonaConfig,
    session: &UserSession,
    display_name: &str,
    preset_note: Option<&str>,
    new_user_text: &str,
) -> Result<Vec<ChatMessage>> {
    let system = persona::system_prompt(cfg, &session.profile, display_name, preset_note)?;

    let mut messages = Vec::with_capacity(session.history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(session.history.iter().cloned());
    messages.push(ChatMessage::user(new_user_text));
    Ok(messages)
}
