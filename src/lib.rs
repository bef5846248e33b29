//! Telegram persona chat bot.
//!
//! Relays chat messages to a local Ollama-compatible model under a
//! configurable persona, with per-user bounded conversation history, a
//! hot-reloadable image-preset registry, and an external image-generation
//! subprocess.

pub mod bot;
pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod orchestrator;
pub mod persona;
pub mod postprocess;
pub mod presets;
pub mod prompt;
pub mod provider;
pub mod session;

pub use error::{Error, Result};
