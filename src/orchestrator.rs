//! Chat turn orchestration.
//!
//! One inbound text message goes through addressing, prompt assembly, the
//! completion backend, post-processing, and history recording. Failures never
//! reach the user as raw errors: the reply degrades to a fixed apology and
//! the turn is not recorded, so a failed exchange leaves no trace in history.

use crate::channels::{ChatKind, InboundMessage};
use crate::config::Config;
use crate::postprocess;
use crate::presets::PresetRegistry;
use crate::prompt;
use crate::provider::{CompletionProvider, SamplingOptions};
use crate::session::SessionStore;
use regex::Regex;
use std::sync::Arc;

/// Fixed reply when the backend fails or produces nothing usable.
pub const APOLOGY: &str =
    "Sorry, I had trouble coming up with a reply just now. Please try again in a moment.";

const CLARIFY: &str = "I'm here! What would you like to talk about?";

/// What a chat turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Group message that did not address the bot. Nothing is sent.
    Ignored,
    /// Text to deliver to the chat.
    Reply(String),
}

pub struct Orchestrator {
    config: Arc<Config>,
    provider: Arc<dyn CompletionProvider>,
    sessions: Arc<SessionStore>,
    registry: Arc<PresetRegistry>,
    mention: Regex,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn CompletionProvider>,
        sessions: Arc<SessionStore>,
        registry: Arc<PresetRegistry>,
    ) -> Self {
        let pattern = format!(r"(?i)@{}", regex::escape(&config.telegram.bot_username));
        let mention = Regex::new(&pattern).expect("escaped username is a valid pattern");
        Self {
            config,
            provider,
            sessions,
            registry,
            mention,
        }
    }

    /// Whether a message is addressed to the bot at all. Private chats
    /// always are; group chats require a mention. Used to gate "typing"
    /// feedback before any work happens.
    pub fn is_addressed(&self, msg: &InboundMessage) -> bool {
        match msg.chat_kind {
            ChatKind::Private => true,
            ChatKind::Group => self.mention.is_match(&msg.text),
        }
    }

    /// Run one chat turn end to end.
    pub async fn handle_turn(&self, msg: &InboundMessage) -> TurnOutcome {
        if !self.is_addressed(msg) {
            return TurnOutcome::Ignored;
        }

        // The prompt sees the mention-stripped text; history records the
        // message as the user actually typed it.
        let effective = match msg.chat_kind {
            ChatKind::Private => msg.text.trim().to_string(),
            ChatKind::Group => self.mention.replace_all(&msg.text, "").trim().to_string(),
        };
        if effective.is_empty() {
            return TurnOutcome::Reply(CLARIFY.to_string());
        }

        let session = self.sessions.snapshot(msg.user_id).await;

        let preset_note = match session.lora_selection.as_deref() {
            Some(name) => self.registry.resolve(name).await.map(|p| match p.creator {
                Some(creator) => format!("(image preset in use: {}, created by {creator})", p.name),
                None => format!("(image preset in use: {})", p.name),
            }),
            None => None,
        };

        let messages = match prompt::build_prompt(
            &self.config.persona,
            &session,
            &msg.display_name,
            preset_note.as_deref(),
            &effective,
        ) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(user_id = msg.user_id, error = %e, "Prompt assembly failed");
                return TurnOutcome::Reply(APOLOGY.to_string());
            }
        };

        let mut options = self.config.model.sampling.clone();
        if let Some(t) = session.profile.temperature {
            options.temperature = t;
        }
        if let Some(p) = session.profile.top_p {
            options.top_p = p;
        }

        let raw = match self.provider.chat(&messages, &options).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    user_id = msg.user_id,
                    provider = self.provider.name(),
                    error = %e,
                    "Completion failed"
                );
                return TurnOutcome::Reply(APOLOGY.to_string());
            }
        };

        let cleaned = postprocess::clean_response(&raw);
        if cleaned.is_empty() {
            tracing::warn!(user_id = msg.user_id, "Reply empty after cleanup");
            return TurnOutcome::Reply(APOLOGY.to_string());
        }

        self.sessions
            .append_turn(msg.user_id, &msg.text, &cleaned)
            .await;
        TurnOutcome::Reply(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::session::ChatMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedProvider {
        reply: Result<String>,
        calls: Mutex<Vec<(Vec<ChatMessage>, SamplingOptions)>>,
    }

    impl ScriptedProvider {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(Error::Provider("backend down".into())),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Vec<ChatMessage>, SamplingOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            options: &SamplingOptions,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((messages.to_vec(), options.clone()));
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(Error::Provider(m)) => Err(Error::Provider(m.clone())),
                Err(_) => unreachable!(),
            }
        }
    }

    async fn empty_registry(dir: &TempDir) -> Arc<PresetRegistry> {
        Arc::new(PresetRegistry::open(dir.path().join("absent.json")).await)
    }

    fn orchestrator(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<PresetRegistry>,
    ) -> (Orchestrator, Arc<SessionStore>) {
        let mut config = Config::default();
        config.telegram.bot_username = "nimbus_bot".into();
        let sessions = Arc::new(SessionStore::new(6));
        let orch = Orchestrator::new(Arc::new(config), provider, sessions.clone(), registry);
        (orch, sessions)
    }

    fn message(chat_kind: ChatKind, text: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            chat_id: "100".into(),
            chat_kind,
            user_id: 7,
            display_name: "Alex".into(),
            username: Some("alex".into()),
            text: text.into(),
            timestamp: 1700000000,
        }
    }

    #[tokio::test]
    async fn private_message_gets_reply_and_history() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("Hi Alex!");
        let (orch, sessions) = orchestrator(provider.clone(), empty_registry(&dir).await);

        let outcome = orch.handle_turn(&message(ChatKind::Private, "hello")).await;
        assert_eq!(outcome, TurnOutcome::Reply("Hi Alex!".into()));

        let history = sessions.snapshot(7).await.history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("hello"));
        assert_eq!(history[1], ChatMessage::assistant("Hi Alex!"));
    }

    #[tokio::test]
    async fn group_message_without_mention_is_ignored() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("never sent");
        let (orch, sessions) = orchestrator(provider.clone(), empty_registry(&dir).await);

        let outcome = orch
            .handle_turn(&message(ChatKind::Group, "chatting among ourselves"))
            .await;
        assert_eq!(outcome, TurnOutcome::Ignored);
        assert!(provider.calls().is_empty());
        assert!(sessions.snapshot(7).await.history.is_empty());
    }

    #[tokio::test]
    async fn group_mention_is_stripped_for_prompt_but_kept_in_history() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("sure");
        let (orch, sessions) = orchestrator(provider.clone(), empty_registry(&dir).await);

        let raw = "@Nimbus_Bot what's the weather?";
        orch.handle_turn(&message(ChatKind::Group, raw)).await;

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        let last = calls[0].0.last().unwrap();
        assert_eq!(last.content, "what's the weather?");

        let history = sessions.snapshot(7).await.history;
        assert_eq!(history[0].content, raw);
    }

    #[tokio::test]
    async fn bare_mention_gets_clarifying_reply_without_backend_call() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("never sent");
        let (orch, sessions) = orchestrator(provider.clone(), empty_registry(&dir).await);

        let outcome = orch
            .handle_turn(&message(ChatKind::Group, "@nimbus_bot"))
            .await;
        assert_eq!(outcome, TurnOutcome::Reply(CLARIFY.into()));
        assert!(provider.calls().is_empty());
        assert!(sessions.snapshot(7).await.history.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_yields_apology_and_no_history() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::failing();
        let (orch, sessions) = orchestrator(provider, empty_registry(&dir).await);

        let outcome = orch.handle_turn(&message(ChatKind::Private, "hello")).await;
        assert_eq!(outcome, TurnOutcome::Reply(APOLOGY.into()));
        assert!(sessions.snapshot(7).await.history.is_empty());
    }

    #[tokio::test]
    async fn reply_is_cleaned_before_delivery_and_recording() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("<think>hmm</think>Hello!");
        let (orch, sessions) = orchestrator(provider, empty_registry(&dir).await);

        let outcome = orch.handle_turn(&message(ChatKind::Private, "hi")).await;
        assert_eq!(outcome, TurnOutcome::Reply("Hello!".into()));
        assert_eq!(sessions.snapshot(7).await.history[1].content, "Hello!");
    }

    #[tokio::test]
    async fn reply_empty_after_cleanup_yields_apology() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("<think>only reasoning</think>");
        let (orch, sessions) = orchestrator(provider, empty_registry(&dir).await);

        let outcome = orch.handle_turn(&message(ChatKind::Private, "hi")).await;
        assert_eq!(outcome, TurnOutcome::Reply(APOLOGY.into()));
        assert!(sessions.snapshot(7).await.history.is_empty());
    }

    #[tokio::test]
    async fn profile_sampling_overrides_apply() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("ok");
        let (orch, sessions) = orchestrator(provider.clone(), empty_registry(&dir).await);

        {
            let session = sessions.get_or_create(7);
            let mut s = session.lock().await;
            s.profile.temperature = Some(0.2);
            s.profile.top_p = Some(0.9);
        }

        orch.handle_turn(&message(ChatKind::Private, "hi")).await;
        let (_, options) = &provider.calls()[0];
        assert!((options.temperature - 0.2).abs() < f64::EPSILON);
        assert!((options.top_p - 0.9).abs() < f64::EPSILON);
        // Non-overridable knobs stay at the configured defaults
        assert!((options.repeat_penalty - 1.08).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn selected_preset_adds_attribution_note_to_system_message() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("presets.json");
        std::fs::write(
            &path,
            r#"{"system_lora": {}, "user_lora": {"forest": {"lora1_name": "f.safetensors", "chat_id": 1, "creator": "casey"}}, "white_list": ["forest"]}"#,
        )
        .unwrap();
        let registry = Arc::new(PresetRegistry::open(path).await);

        let provider = ScriptedProvider::replying("ok");
        let (orch, sessions) = orchestrator(provider.clone(), registry);
        sessions.set_preset(7, "forest").await;

        orch.handle_turn(&message(ChatKind::Private, "hi")).await;
        let system = &provider.calls()[0].0[0];
        assert!(system.content.contains("forest"));
        assert!(system.content.contains("casey"));
    }

    #[tokio::test]
    async fn default_config_does_not_treat_any_at_sign_as_a_mention() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("ok");
        let sessions = Arc::new(SessionStore::new(6));
        let orch = Orchestrator::new(
            Arc::new(Config::default()),
            provider,
            sessions,
            empty_registry(&dir).await,
        );

        assert!(!orch.is_addressed(&message(ChatKind::Group, "email me at bob@example.com")));
        assert!(orch.is_addressed(&message(ChatKind::Group, "@persona_bot hello")));
    }

    #[tokio::test]
    async fn is_addressed_matches_mention_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::replying("ok");
        let (orch, _sessions) = orchestrator(provider, empty_registry(&dir).await);

        assert!(orch.is_addressed(&message(ChatKind::Group, "hey @NIMBUS_bot hi")));
        assert!(!orch.is_addressed(&message(ChatKind::Group, "hey everyone")));
        assert!(orch.is_addressed(&message(ChatKind::Private, "anything")));
    }
}
