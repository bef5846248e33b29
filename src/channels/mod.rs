//! Messaging transports.

pub mod telegram;
pub mod traits;

pub use telegram::TelegramChannel;
pub use traits::{Channel, ChatKind, InboundMessage};
