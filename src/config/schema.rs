//! Configuration schema.
//!
//! A single JSON config file, with environment variable overrides applied on
//! top of file values:
//!
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `OLLAMA_BASE_URL`    → model.base_url
//! - `OLLAMA_MODEL`       → model.model
//! - `MAX_HISTORY`        → session.max_turns

use crate::provider::SamplingOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub persona: PersonaConfig,

    #[serde(default)]
    pub presets: PresetWatchConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a file, then apply environment overrides.
    ///
    /// A missing file yields defaults (env overrides still apply); a present
    /// but malformed file is a startup error. The second value reports
    /// whether the file was found, so the caller can log the fallback after
    /// the logging subscriber exists.
    pub fn load(path: &Path) -> Result<(Self, bool)> {
        let (mut config, found) = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            (config, true)
        } else {
            (Self::default(), false)
        };

        config.apply_env();
        Ok((config, found))
    }

    /// Apply environment variable overrides.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram.bot_token = token;
            }
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            if !url.is_empty() {
                self.model.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            if !model.is_empty() {
                self.model.model = model;
            }
        }
        if let Ok(max) = std::env::var("MAX_HISTORY") {
            if let Ok(n) = max.parse::<usize>() {
                self.session.max_turns = n;
            }
        }
    }

    /// Validate settings the process cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!(
                "Telegram bot token is not configured. \
                 Set telegram.bot_token in the config file or the TELEGRAM_BOT_TOKEN environment variable."
            );
        }
        if self.session.max_turns == 0 {
            anyhow::bail!("session.max_turns must be at least 1");
        }
        Ok(())
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token. Required at startup.
    #[serde(default)]
    pub bot_token: String,

    /// Bot handle (without `@`) used for group-chat mention addressing.
    /// Must never be empty: an empty handle would turn the mention pattern
    /// into a bare `@` that matches any message containing one.
    #[serde(default = "default_bot_username")]
    pub bot_username: String,
}

fn default_bot_username() -> String {
    "persona_bot".into()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            bot_username: default_bot_username(),
        }
    }
}

/// Completion backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the Ollama-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name to request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Whether to run one throwaway exchange at startup to warm the model.
    #[serde(default = "default_prewarm")]
    pub prewarm: bool,

    /// Hard timeout for one completion call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Fixed sampling parameters sent with every request.
    #[serde(default)]
    pub sampling: SamplingOptions,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".into()
}

fn default_model() -> String {
    "llama3".into()
}

fn default_prewarm() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            prewarm: default_prewarm(),
            request_timeout_secs: default_request_timeout_secs(),
            sampling: SamplingOptions::default(),
        }
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum retained turns (one turn = user message + assistant reply).
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    6
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// Persona defaults. All free text; per-user overrides layer on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Default character name.
    #[serde(default = "default_persona_name")]
    pub name: String,

    /// Default character age.
    #[serde(default = "default_persona_age")]
    pub age: u32,

    /// Base description. Never overwritten; user fragments are appended.
    #[serde(default = "default_persona_description")]
    pub base_description: String,

    /// System prompt template with `{name}`, `{age}`, `{description}` and
    /// `{user_title}` placeholders.
    #[serde(default = "default_persona_template")]
    pub template: String,

    /// Honorific appended to the requester's display name to form
    /// `{user_title}`. Empty means the display name is used as-is.
    #[serde(default)]
    pub honorific: String,
}

fn default_persona_name() -> String {
    "Nimbus".into()
}

fn default_persona_age() -> u32 {
    25
}

fn default_persona_description() -> String {
    "a cheerful virtual companion who lives in a little studio by the sea".into()
}

fn default_persona_template() -> String {
    "You are {name}, a {age}-year-old virtual companion. You are {description}. \
     Keep your replies short and conversational, and address the user as {user_title}."
        .into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            age: default_persona_age(),
            base_description: default_persona_description(),
            template: default_persona_template(),
            honorific: String::new(),
        }
    }
}

/// Preset registry file location and watcher cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetWatchConfig {
    /// Path of the preset JSON file.
    #[serde(default = "default_preset_path")]
    pub path: PathBuf,

    /// Poll interval of the change watcher, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_preset_path() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_poll_interval_secs() -> u64 {
    1
}

impl Default for PresetWatchConfig {
    fn default() -> Self {
        Self {
            path: default_preset_path(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Image generation relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Whether the `/image` command is available at all.
    #[serde(default = "default_image_enabled")]
    pub enabled: bool,

    /// Interpreter the generation script runs under.
    #[serde(default = "default_image_program")]
    pub program: String,

    /// The generation script itself.
    #[serde(default = "default_image_script")]
    pub script: String,

    /// Workflow/API description file passed through to the script.
    #[serde(default = "default_api_file")]
    pub api_file: PathBuf,

    /// Directory generated images land in; kept alive by a background task.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_image_enabled() -> bool {
    true
}

fn default_image_program() -> String {
    "python3".into()
}

fn default_image_script() -> String {
    "image.py".into()
}

fn default_api_file() -> PathBuf {
    PathBuf::from("flux_workflow.json")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("images")
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: default_image_enabled(),
            program: default_image_program(),
            script: default_image_script(),
            api_file: default_api_file(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// Outbound delivery constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum characters per outbound message; longer replies are chunked.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Changelog file served by `/log`.
    #[serde(default = "default_changelog_path")]
    pub changelog_path: PathBuf,
}

fn default_max_message_chars() -> usize {
    2048
}

fn default_changelog_path() -> PathBuf {
    PathBuf::from("changelog.txt")
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            changelog_path: default_changelog_path(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}
