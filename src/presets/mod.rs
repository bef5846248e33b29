//! Image-generation presets: registry plus change watcher.

pub mod registry;
pub mod watcher;

pub use registry::{
    LoraParams, PresetFile, PresetNamespace, PresetRegistry, ResolvedPreset, UserPreset,
};
pub use watcher::PresetWatcher;
