pub mod schema;

pub use schema::{
    Config, DeliveryConfig, ImageConfig, ModelConfig, ObservabilityConfig, PersonaConfig,
    PresetWatchConfig, SessionConfig, TelegramConfig,
};
