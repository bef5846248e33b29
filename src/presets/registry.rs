//! Hot-reloadable preset registry.
//!
//! Presets live in a JSON file with a system namespace and a user namespace,
//! plus the persisted notification white list. The in-memory map is replaced
//! atomically when the file's content fingerprint changes; a malformed or
//! unreadable file always leaves the previous registry untouched.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// LoRA selection parameters for one preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraParams {
    #[serde(default)]
    pub lora1_name: String,

    #[serde(default = "default_strength")]
    pub lora1_strength: f64,

    #[serde(default)]
    pub lora2_name: String,

    #[serde(default = "default_strength")]
    pub lora2_strength: f64,
}

fn default_strength() -> f64 {
    1.0
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            lora1_name: String::new(),
            lora1_strength: default_strength(),
            lora2_name: String::new(),
            lora2_strength: default_strength(),
        }
    }
}

/// A user-trained preset: parameters plus who to notify when it appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreset {
    #[serde(flatten)]
    pub params: LoraParams,

    /// Chat to notify once when the preset first appears.
    pub chat_id: i64,

    #[serde(default)]
    pub creator: Option<String>,
}

/// On-disk shape of the preset file.
///
/// Unknown top-level keys are preserved across the watcher's write-backs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub system_lora: BTreeMap<String, LoraParams>,

    #[serde(default)]
    pub user_lora: BTreeMap<String, UserPreset>,

    #[serde(default)]
    pub white_list: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Which namespace a lookup hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetNamespace {
    System,
    User,
}

/// A successful preset lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPreset {
    pub name: String,
    pub namespace: PresetNamespace,
    pub params: LoraParams,
    pub creator: Option<String>,
}

struct RegistryState {
    file: PresetFile,
    fingerprint: Option<String>,
}

/// Shared, hot-reloadable view of the preset file.
pub struct PresetRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
}

/// Cheap content-identity check for change detection.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl PresetRegistry {
    /// Open the registry, loading the file if it exists.
    ///
    /// Load failures are logged and leave the registry empty; they are never
    /// fatal.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = RegistryState {
            file: PresetFile::default(),
            fingerprint: None,
        };

        match Self::read_file(&path).await {
            Ok((file, fp)) => {
                tracing::info!(
                    path = %path.display(),
                    system = file.system_lora.len(),
                    user = file.user_lora.len(),
                    "Preset file loaded"
                );
                state.file = file;
                state.fingerprint = Some(fp);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Preset file unavailable, starting empty");
            }
        }

        Self {
            path,
            state: RwLock::new(state),
        }
    }

    async fn read_file(path: &Path) -> Result<(PresetFile, String)> {
        let bytes = tokio::fs::read(path).await?;
        let file: PresetFile = serde_json::from_slice(&bytes)?;
        Ok((file, fingerprint(&bytes)))
    }

    /// Reload the file if its content fingerprint changed.
    ///
    /// Returns whether a reload happened. A malformed file keeps the previous
    /// registry and returns false.
    pub async fn maybe_reload(&self) -> bool {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Preset file unreadable");
                return false;
            }
        };
        let fp = fingerprint(&bytes);

        {
            let state = self.state.read().await;
            if state.fingerprint.as_deref() == Some(fp.as_str()) {
                return false;
            }
        }

        match serde_json::from_slice::<PresetFile>(&bytes) {
            Ok(file) => {
                let mut state = self.state.write().await;
                // Recheck under the write lock: another caller may have
                // reloaded this same change between the locks.
                if state.fingerprint.as_deref() == Some(fp.as_str()) {
                    return false;
                }
                state.file = file;
                state.fingerprint = Some(fp);
                tracing::info!(path = %self.path.display(), "Preset file reloaded");
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed preset file, keeping previous registry"
                );
                false
            }
        }
    }

    /// Exact-match lookup, system namespace first.
    pub async fn resolve(&self, name: &str) -> Option<ResolvedPreset> {
        let state = self.state.read().await;
        if let Some(params) = state.file.system_lora.get(name) {
            return Some(ResolvedPreset {
                name: name.to_string(),
                namespace: PresetNamespace::System,
                params: params.clone(),
                creator: None,
            });
        }
        if let Some(preset) = state.file.user_lora.get(name) {
            return Some(ResolvedPreset {
                name: name.to_string(),
                namespace: PresetNamespace::User,
                params: preset.params.clone(),
                creator: preset.creator.clone(),
            });
        }
        None
    }

    /// Preset names per namespace, for listings.
    pub async fn preset_names(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.read().await;
        (
            state.file.system_lora.keys().cloned().collect(),
            state.file.user_lora.keys().cloned().collect(),
        )
    }

    /// Clone the current file contents.
    pub async fn snapshot(&self) -> PresetFile {
        self.state.read().await.file.clone()
    }

    pub async fn is_whitelisted(&self, name: &str) -> bool {
        let state = self.state.read().await;
        state.file.white_list.iter().any(|n| n == name)
    }

    /// Add a preset name to the persisted white list and write the file back
    /// atomically (temp file + rename). The fingerprint is updated to the
    /// written bytes so our own write is not detected as an external change.
    pub async fn whitelist(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.file.white_list.iter().any(|n| n == name) {
            state.file.white_list.push(name.to_string());
        }

        let bytes = serde_json::to_vec_pretty(&state.file)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        state.fingerprint = Some(fingerprint(&bytes));
        Ok(())
    }
}
