//! Preset change watcher.
//!
//! Polls the preset file and, when a user preset appears that is neither in
//! the persisted white list nor already handled this run, sends a one-time
//! "training finished" notification to that preset's chat and persists the
//! name into the white list. Per key the transition is Unseen →
//! Seen-and-notified, exactly once per run; a crash between notify and
//! persist can duplicate a notification on restart, never drop one.

use super::registry::PresetRegistry;
use crate::channels::Channel;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct PresetWatcher {
    registry: Arc<PresetRegistry>,
    channel: Arc<dyn Channel>,
    poll_interval: Duration,
    /// In-run fast-path guard; the white list is the durable one.
    processed: HashSet<String>,
}

impl PresetWatcher {
    pub fn new(
        registry: Arc<PresetRegistry>,
        channel: Arc<dyn Channel>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            channel,
            poll_interval,
            processed: HashSet::new(),
        }
    }

    /// Poll forever. Every failure mode inside a scan is handled in place,
    /// so the loop itself never stops.
    pub async fn run(mut self) {
        tracing::info!(interval = ?self.poll_interval, "Preset watcher started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            self.scan_once().await;
        }
    }

    /// One poll cycle: pick up file changes, notify new user presets.
    /// Returns how many notifications went out.
    pub async fn scan_once(&mut self) -> usize {
        self.registry.maybe_reload().await;

        let snapshot = self.registry.snapshot().await;
        let mut notified = 0;

        for (name, preset) in &snapshot.user_lora {
            if snapshot.white_list.iter().any(|n| n == name) || self.processed.contains(name) {
                continue;
            }

            tracing::info!(preset = %name, chat_id = preset.chat_id, "New preset detected");
            let text = format!("Good news! Preset '{name}' has finished training and is ready to use.");
            if let Err(e) = self.channel.send(&text, &preset.chat_id.to_string()).await {
                // Not whitelisted: retried next cycle so the notification is
                // never dropped.
                tracing::warn!(preset = %name, error = %e, "Preset notification failed");
                continue;
            }

            self.processed.insert(name.clone());
            if let Err(e) = self.registry.whitelist(name).await {
                tracing::warn!(preset = %name, error = %e, "Failed to persist white list");
            }
            notified += 1;
        }

        notified
    }
}
