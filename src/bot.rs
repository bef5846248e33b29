//! Bot wiring and dispatch.
//!
//! Owns the long-running pieces (channel listener, preset watcher, storage
//! keep-alive) and routes each inbound message to either the command handler
//! or the chat orchestrator. Every update is dispatched on its own task so a
//! slow completion never blocks the poll loop.

use crate::channels::{Channel, ChatKind, InboundMessage, TelegramChannel};
use crate::commands::Command;
use crate::config::Config;
use crate::image::{self, ImageGenerator};
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::persona;
use crate::postprocess;
use crate::presets::{LoraParams, PresetRegistry, PresetWatcher};
use crate::provider::{CompletionProvider, OllamaProvider};
use crate::session::{ChatMessage, SessionStore, UserSession};
use std::sync::Arc;
use std::time::Duration;

const HELP_TEXT: &str = "Here's what I can do:\n\
    /start — introduction\n\
    /reset — forget our conversation so far\n\
    /set_name <name> — rename my character\n\
    /set_age <age> — change my character's age\n\
    /set_desc <text> — add to my character's description (no text shows the current one)\n\
    /myprofile — show the current character settings\n\
    /image <prompt> — generate a picture (private chat only)\n\
    /image_option [preset] — pick an image style, or list the available ones\n\
    /log — recent changes\n\
    /help — this message\n\n\
    Anything else you send me is just conversation.";

pub struct Bot {
    config: Arc<Config>,
    channel: Arc<TelegramChannel>,
    provider: Arc<dyn CompletionProvider>,
    sessions: Arc<SessionStore>,
    registry: Arc<PresetRegistry>,
    orchestrator: Orchestrator,
    images: ImageGenerator,
}

impl Bot {
    pub async fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let channel = Arc::new(TelegramChannel::new(config.telegram.bot_token.clone()));
        let provider: Arc<dyn CompletionProvider> = Arc::new(OllamaProvider::new(
            &config.model.base_url,
            config.model.model.clone(),
            Duration::from_secs(config.model.request_timeout_secs),
        ));
        let sessions = Arc::new(SessionStore::new(config.session.max_turns));
        let registry = Arc::new(PresetRegistry::open(config.presets.path.clone()).await);
        let orchestrator = Orchestrator::new(
            config.clone(),
            provider.clone(),
            sessions.clone(),
            registry.clone(),
        );
        let images = ImageGenerator::new(config.image.clone());

        Self {
            config,
            channel,
            provider,
            sessions,
            registry,
            orchestrator,
            images,
        }
    }

    /// Run until the listener exits. Background tasks die with the process.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        if !self.channel.health_check().await {
            tracing::warn!("Telegram health check failed, starting anyway");
        }

        if self.config.model.prewarm {
            let bot = self.clone();
            tokio::spawn(async move { bot.prewarm().await });
        }

        let watcher = PresetWatcher::new(
            self.registry.clone(),
            self.channel.clone() as Arc<dyn Channel>,
            Duration::from_secs(self.config.presets.poll_interval_secs),
        );
        tokio::spawn(watcher.run());

        if self.config.image.enabled {
            tokio::spawn(image::keep_storage_dir(self.config.image.storage_dir.clone()));
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel::<InboundMessage>(64);
        let listener = {
            let channel = self.channel.clone();
            tokio::spawn(async move { channel.listen(tx).await })
        };

        while let Some(msg) = rx.recv().await {
            let bot = self.clone();
            tokio::spawn(async move {
                if let Err(e) = bot.dispatch(&msg).await {
                    tracing::error!(
                        user_id = msg.user_id,
                        chat_id = %msg.chat_id,
                        error = %e,
                        "Dispatch failed"
                    );
                }
            });
        }

        listener.await??;
        Ok(())
    }

    /// One throwaway exchange so the first real user does not pay the model
    /// load time.
    async fn prewarm(&self) {
        tracing::info!(model = %self.config.model.model, "Pre-warming model");
        let messages = [ChatMessage::user("hi")];
        match self
            .provider
            .chat(&messages, &self.config.model.sampling)
            .await
        {
            Ok(_) => tracing::info!("Model pre-warm complete"),
            Err(e) => tracing::warn!(error = %e, "Model pre-warm failed"),
        }
    }

    async fn dispatch(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        if let Some(command) = Command::parse(&msg.text, &self.config.telegram.bot_username) {
            return self.handle_command(msg, command).await;
        }
        // A command addressed to a different bot; not ours to answer and
        // not conversation either.
        if msg.text.trim().starts_with('/') {
            return Ok(());
        }

        // Typing feedback only once we know we will actually answer.
        if self.orchestrator.is_addressed(msg) {
            if let Err(e) = self.channel.send_chat_action(&msg.chat_id, "typing").await {
                tracing::debug!(error = %e, "Chat action failed");
            }
        }

        match self.orchestrator.handle_turn(msg).await {
            TurnOutcome::Ignored => Ok(()),
            TurnOutcome::Reply(text) => self.send_chunked(&msg.chat_id, &text).await,
        }
    }

    /// Deliver text in transport-sized chunks, in order.
    async fn send_chunked(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        for chunk in postprocess::chunk_message(text, self.config.delivery.max_message_chars) {
            self.channel.send(&chunk, chat_id).await?;
        }
        Ok(())
    }

    async fn handle_command(&self, msg: &InboundMessage, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Start => {
                let snapshot = self.sessions.snapshot(msg.user_id).await;
                let name = snapshot
                    .profile
                    .name
                    .unwrap_or_else(|| self.config.persona.name.clone());
                let text = format!(
                    "Hi {}! I'm {name}. Send me a message to chat, or /help to see what I can do.",
                    msg.display_name
                );
                self.channel.send(&text, &msg.chat_id).await
            }
            Command::Reset => {
                self.sessions.reset(msg.user_id).await;
                self.channel
                    .send("Done — I've forgotten our conversation so far.", &msg.chat_id)
                    .await
            }
            Command::Help => self.channel.send(HELP_TEXT, &msg.chat_id).await,
            Command::SetName(arg) => {
                let Some(name) = arg else {
                    return self
                        .channel
                        .send("Usage: /set_name <name>", &msg.chat_id)
                        .await;
                };
                match self.sessions.set_name(msg.user_id, &name).await {
                    Ok(name) => {
                        self.channel
                            .send(&format!("From now on, call me {name}."), &msg.chat_id)
                            .await
                    }
                    Err(e) => self.channel.send(&e.to_string(), &msg.chat_id).await,
                }
            }
            Command::SetAge(arg) => {
                let Some(age) = arg else {
                    return self
                        .channel
                        .send("Usage: /set_age <age>", &msg.chat_id)
                        .await;
                };
                match self.sessions.set_age(msg.user_id, &age).await {
                    Ok(age) => {
                        self.channel
                            .send(&format!("Alright, I'm {age} now."), &msg.chat_id)
                            .await
                    }
                    Err(e) => self.channel.send(&e.to_string(), &msg.chat_id).await,
                }
            }
            Command::SetDesc(arg) => match arg {
                None => {
                    let snapshot = self.sessions.snapshot(msg.user_id).await;
                    let desc = snapshot
                        .profile
                        .full_description(&self.config.persona.base_description);
                    self.channel
                        .send(&format!("Current description: {desc}"), &msg.chat_id)
                        .await
                }
                Some(fragment) => {
                    match self
                        .sessions
                        .set_additional_description(msg.user_id, &fragment)
                        .await
                    {
                        Ok(()) => {
                            self.channel
                                .send("Got it, I've added that to my description.", &msg.chat_id)
                                .await
                        }
                        Err(e) => self.channel.send(&e.to_string(), &msg.chat_id).await,
                    }
                }
            },
            Command::MyProfile => {
                let snapshot = self.sessions.snapshot(msg.user_id).await;
                let text = self.profile_summary(&snapshot, &msg.display_name);
                self.send_chunked(&msg.chat_id, &text).await
            }
            Command::Image(arg) => self.handle_image(msg, arg).await,
            Command::ImageOption(arg) => self.handle_image_option(msg, arg).await,
            Command::Log => self.handle_log(msg).await,
            Command::Unknown(name) => {
                self.channel
                    .send(
                        &format!("I don't know {name}. Try /help for the full list."),
                        &msg.chat_id,
                    )
                    .await
            }
        }
    }

    fn profile_summary(&self, session: &UserSession, display_name: &str) -> String {
        let p = &self.config.persona;
        let name = session.profile.name.as_deref().unwrap_or(&p.name);
        let age = session.profile.age.unwrap_or(p.age);
        let desc = session.profile.full_description(&p.base_description);
        let preset = session.lora_selection.as_deref().unwrap_or("(none)");

        let prompt_preview = persona::system_prompt(p, &session.profile, display_name, None)
            .unwrap_or_else(|e| format!("(template error: {e})"));

        format!(
            "Name: {name}\nAge: {age}\nDescription: {desc}\nImage preset: {preset}\n\nPrompt preview:\n{prompt_preview}"
        )
    }

    async fn handle_image(&self, msg: &InboundMessage, arg: Option<String>) -> anyhow::Result<()> {
        if msg.chat_kind != ChatKind::Private {
            return self
                .channel
                .send("Image generation only works in a private chat with me.", &msg.chat_id)
                .await;
        }
        if !self.config.image.enabled {
            return self
                .channel
                .send("Image generation is currently disabled.", &msg.chat_id)
                .await;
        }
        let Some(prompt) = arg else {
            return self
                .channel
                .send("Usage: /image <prompt>", &msg.chat_id)
                .await;
        };

        if let Err(e) = self
            .channel
            .send_chat_action(&msg.chat_id, "upload_photo")
            .await
        {
            tracing::debug!(error = %e, "Chat action failed");
        }

        let session = self.sessions.snapshot(msg.user_id).await;
        let params = image_params(&session, &self.registry).await;

        let paths = match self.images.generate(&prompt, &params).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user_id = msg.user_id, error = %e, "Image generation failed");
                return self
                    .channel
                    .send(
                        "Sorry, I couldn't generate that image. Please try again later.",
                        &msg.chat_id,
                    )
                    .await;
            }
        };

        // Per-file failures are logged, never abort the batch.
        for path in &paths {
            if let Err(e) = self.channel.send_photo(&msg.chat_id, path, None).await {
                tracing::warn!(path = %path.display(), error = %e, "Photo delivery failed");
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup failed");
            }
        }
        Ok(())
    }

    async fn handle_image_option(
        &self,
        msg: &InboundMessage,
        arg: Option<String>,
    ) -> anyhow::Result<()> {
        if msg.chat_kind != ChatKind::Private {
            return self
                .channel
                .send("Preset selection only works in a private chat with me.", &msg.chat_id)
                .await;
        }

        // A preset added to the file moments ago should be selectable now.
        self.registry.maybe_reload().await;

        match arg {
            None => {
                let (system, user) = self.registry.preset_names().await;
                let text = if system.is_empty() && user.is_empty() {
                    "No image presets are available yet.".to_string()
                } else {
                    format!(
                        "Available presets:\n{}\nYour presets:\n{}\n\nPick one with /image_option <name>.",
                        format_names(&system),
                        format_names(&user),
                    )
                };
                self.channel.send(&text, &msg.chat_id).await
            }
            Some(name) => match self.registry.resolve(&name).await {
                Some(preset) => {
                    self.sessions.set_preset(msg.user_id, &preset.name).await;
                    self.channel
                        .send(
                            &format!("Alright, I'll use the '{}' preset for images.", preset.name),
                            &msg.chat_id,
                        )
                        .await
                }
                None => {
                    self.channel
                        .send(
                            &format!(
                                "I don't have a preset called '{name}'. Use /image_option to see the list."
                            ),
                            &msg.chat_id,
                        )
                        .await
                }
            },
        }
    }

    async fn handle_log(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        match tokio::fs::read_to_string(&self.config.delivery.changelog_path).await {
            Ok(content) if !content.trim().is_empty() => {
                self.send_chunked(&msg.chat_id, content.trim()).await
            }
            Ok(_) => self.channel.send("No changelog available.", &msg.chat_id).await,
            Err(e) => {
                tracing::debug!(error = %e, "Changelog unreadable");
                self.channel.send("No changelog available.", &msg.chat_id).await
            }
        }
    }
}

/// LoRA parameters for one generation: the user's selected preset if it still
/// resolves, otherwise the first system preset, otherwise neutral defaults.
async fn image_params(session: &UserSession, registry: &PresetRegistry) -> LoraParams {
    if let Some(name) = session.lora_selection.as_deref() {
        if let Some(preset) = registry.resolve(name).await {
            return preset.params;
        }
        tracing::warn!(preset = name, "Selected preset no longer exists, falling back");
    }

    let snapshot = registry.snapshot().await;
    if let Some((name, params)) = snapshot.system_lora.iter().next() {
        tracing::debug!(preset = %name, "Using first system preset");
        return params.clone();
    }
    LoraParams::default()
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "  (none)".to_string()
    } else {
        names
            .iter()
            .map(|n| format!("  {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRESETS: &str = r#"{
        "system_lora": {
            "ink": {"lora1_name": "ink.safetensors", "lora1_strength": 0.7}
        },
        "user_lora": {
            "forest": {"lora1_name": "forest.safetensors", "chat_id": 1}
        },
        "white_list": ["forest"]
    }"#;

    async fn registry_with(content: &str) -> (TempDir, PresetRegistry) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("presets.json");
        std::fs::write(&path, content).unwrap();
        let reg = PresetRegistry::open(path).await;
        (dir, reg)
    }

    #[tokio::test]
    async fn image_params_prefers_user_selection() {
        let (_dir, registry) = registry_with(PRESETS).await;
        let session = UserSession {
            lora_selection: Some("forest".into()),
            ..Default::default()
        };
        let params = image_params(&session, &registry).await;
        assert_eq!(params.lora1_name, "forest.safetensors");
    }

    #[tokio::test]
    async fn image_params_falls_back_to_first_system_preset() {
        let (_dir, registry) = registry_with(PRESETS).await;
        let session = UserSession::default();
        let params = image_params(&session, &registry).await;
        assert_eq!(params.lora1_name, "ink.safetensors");
        assert!((params.lora1_strength - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn image_params_with_empty_registry_is_default() {
        let (_dir, registry) =
            registry_with(r#"{"system_lora": {}, "user_lora": {}, "white_list": []}"#).await;
        let session = UserSession::default();
        assert_eq!(image_params(&session, &registry).await, LoraParams::default());
    }

    #[tokio::test]
    async fn stale_selection_falls_back() {
        let (_dir, registry) = registry_with(PRESETS).await;
        let session = UserSession {
            lora_selection: Some("deleted-ages-ago".into()),
            ..Default::default()
        };
        let params = image_params(&session, &registry).await;
        assert_eq!(params.lora1_name, "ink.safetensors");
    }

    #[test]
    fn help_text_lists_every_command() {
        for cmd in [
            "/start",
            "/reset",
            "/help",
            "/set_name",
            "/set_age",
            "/set_desc",
            "/myprofile",
            "/image",
            "/image_option",
            "/log",
        ] {
            assert!(HELP_TEXT.contains(cmd), "help is missing {cmd}");
        }
    }
}
