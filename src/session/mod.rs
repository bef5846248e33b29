//! Per-user session management.
//!
//! The store keys sessions by Telegram user id and serializes all mutation
//! through one async mutex per user, so concurrent messages from the same
//! user cannot interleave history appends.

pub mod types;

pub use types::{ChatMessage, Role, UserProfile, UserSession};

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Inclusive age bounds accepted by `set_age`.
const AGE_RANGE: std::ops::RangeInclusive<u32> = 1..=120;

/// Session store: user id → session, history bounded in whole turns.
pub struct SessionStore {
    max_turns: usize,
    sessions: DashMap<i64, Arc<Mutex<UserSession>>>,
}

impl SessionStore {
    /// Create a store retaining at most `max_turns` turns per user.
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: DashMap::new(),
        }
    }

    /// Fetch the session for a user, creating a default one on first contact.
    /// Never fails.
    pub fn get_or_create(&self, user_id: i64) -> Arc<Mutex<UserSession>> {
        self.sessions.entry(user_id).or_default().clone()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Append one whole turn (user message + assistant reply) atomically,
    /// evicting oldest pairs until the bound holds again.
    pub async fn append_turn(&self, user_id: i64, user_text: &str, assistant_text: &str) {
        let session = self.get_or_create(user_id);
        let mut s = session.lock().await;
        s.history.push(ChatMessage::user(user_text));
        s.history.push(ChatMessage::assistant(assistant_text));

        let max_messages = self.max_turns * 2;
        while s.history.len() > max_messages {
            s.history.drain(..2);
        }
    }

    /// Clear history only; profile and preset selection survive.
    pub async fn reset(&self, user_id: i64) {
        let session = self.get_or_create(user_id);
        session.lock().await.history.clear();
    }

    /// Set the character name override. Rejects empty names.
    pub async fn set_name(&self, user_id: i64, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        let session = self.get_or_create(user_id);
        session.lock().await.profile.name = Some(name.to_string());
        Ok(name.to_string())
    }

    /// Set the character age override. Rejects non-numeric and out-of-range
    /// values without mutating anything.
    pub async fn set_age(&self, user_id: i64, age_raw: &str) -> Result<u32> {
        let age: u32 = age_raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("age must be a number, got '{age_raw}'")))?;
        if !AGE_RANGE.contains(&age) {
            return Err(Error::InvalidInput(format!(
                "age must be between {} and {}",
                AGE_RANGE.start(),
                AGE_RANGE.end()
            )));
        }
        let session = self.get_or_create(user_id);
        session.lock().await.profile.age = Some(age);
        Ok(age)
    }

    /// Store the user-appended description fragment. The base description is
    /// configuration and is never overwritten, only extended.
    pub async fn set_additional_description(&self, user_id: i64, fragment: &str) -> Result<()> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(Error::InvalidInput("description must not be empty".into()));
        }
        let session = self.get_or_create(user_id);
        session.lock().await.profile.additional_description = Some(fragment.to_string());
        Ok(())
    }

    /// Record the selected image-generation preset.
    pub async fn set_preset(&self, user_id: i64, preset_name: &str) {
        let session = self.get_or_create(user_id);
        session.lock().await.lora_selection = Some(preset_name.to_string());
    }

    /// Clone the current session state for read-only use (prompt assembly,
    /// profile display) without holding the per-user lock.
    pub async fn snapshot(&self, user_id: i64) -> UserSession {
        let session = self.get_or_create(user_id);
        let s = session.lock().await;
        s.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_lazy_and_unique() {
        let store = SessionStore::new(6);
        assert!(store.is_empty());
        let a = store.get_or_create(1);
        let b = store.get_or_create(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn append_turn_keeps_pairs() {
        let store = SessionStore::new(6);
        store.append_turn(1, "hello", "hi there").await;
        let s = store.snapshot(1).await;
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.history[0], ChatMessage::user("hello"));
        assert_eq!(s.history[1], ChatMessage::assistant("hi there"));
    }

    #[tokio::test]
    async fn history_bound_evicts_oldest_pairs_fifo() {
        let store = SessionStore::new(3);
        for i in 0..10 {
            store
                .append_turn(1, &format!("u{i}"), &format!("a{i}"))
                .await;
            let len = store.snapshot(1).await.history.len();
            assert!(len <= 6, "bound violated after append {i}: {len}");
        }
        let s = store.snapshot(1).await;
        assert_eq!(s.history.len(), 6);
        // Most recent 3 turns, original order, whole pairs
        assert_eq!(s.history[0], ChatMessage::user("u7"));
        assert_eq!(s.history[1], ChatMessage::assistant("a7"));
        assert_eq!(s.history[4], ChatMessage::user("u9"));
        assert_eq!(s.history[5], ChatMessage::assistant("a9"));
    }

    #[tokio::test]
    async fn reset_clears_history_keeps_profile() {
        let store = SessionStore::new(6);
        store.set_name(1, "Momo").await.unwrap();
        store.set_preset(1, "watercolor").await;
        store.append_turn(1, "q", "a").await;

        store.reset(1).await;

        let s = store.snapshot(1).await;
        assert!(s.history.is_empty());
        assert_eq!(s.profile.name.as_deref(), Some("Momo"));
        assert_eq!(s.lora_selection.as_deref(), Some("watercolor"));
    }

    #[tokio::test]
    async fn set_name_rejects_empty_without_mutation() {
        let store = SessionStore::new(6);
        store.set_name(1, "Keep").await.unwrap();
        let err = store.set_name(1, "   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.snapshot(1).await.profile.name.as_deref(), Some("Keep"));
    }

    #[tokio::test]
    async fn set_age_validates() {
        let store = SessionStore::new(6);
        assert!(store.set_age(1, "twelve").await.is_err());
        assert!(store.set_age(1, "0").await.is_err());
        assert!(store.set_age(1, "500").await.is_err());
        assert!(store.snapshot(1).await.profile.age.is_none());

        assert_eq!(store.set_age(1, "30").await.unwrap(), 30);
        assert_eq!(store.snapshot(1).await.profile.age, Some(30));
    }

    #[tokio::test]
    async fn description_fragment_is_stored_not_merged_into_base() {
        let store = SessionStore::new(6);
        store
            .set_additional_description(1, "enjoys hiking")
            .await
            .unwrap();
        let s = store.snapshot(1).await;
        assert_eq!(
            s.profile.additional_description.as_deref(),
            Some("enjoys hiking")
        );
        assert_eq!(s.profile.full_description("base"), "base enjoys hiking");
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_user() {
        let store = SessionStore::new(6);
        store.append_turn(1, "from one", "r1").await;
        store.append_turn(2, "from two", "r2").await;
        assert_eq!(store.snapshot(1).await.history[0].content, "from one");
        assert_eq!(store.snapshot(2).await.history[0].content, "from two");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_appends_stay_paired() {
        let store = Arc::new(SessionStore::new(50));
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_turn(1, &format!("u{i}"), &format!("a{i}"))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let s = store.snapshot(1).await;
        assert_eq!(s.history.len(), 40);
        // Every even index is a user message immediately followed by its reply
        for pair in s.history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
