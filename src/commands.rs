//! Command parsing.
//!
//! Telegram commands arrive as plain text (`/set_name Momo`), optionally with
//! the bot handle attached (`/help@persona_bot`). Parsing is purely
//! syntactic; argument validation happens where the command is executed.

/// A recognized command with its raw argument text, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
    Help,
    SetName(Option<String>),
    SetAge(Option<String>),
    SetDesc(Option<String>),
    MyProfile,
    Image(Option<String>),
    ImageOption(Option<String>),
    Log,
    /// Leading-slash text that matched no known command.
    Unknown(String),
}

impl Command {
    /// Parse a message text. Returns `None` for ordinary (non-command) text
    /// and for commands addressed to a different bot (`/cmd@otherbot`).
    pub fn parse(text: &str, bot_username: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (text, ""),
        };
        // `/cmd@botname` addresses a specific bot in a group; Telegram
        // handles are case-insensitive.
        let (name, handle) = match head.split_once('@') {
            Some((n, h)) => (n, Some(h)),
            None => (head, None),
        };
        if let Some(handle) = handle {
            if !handle.eq_ignore_ascii_case(bot_username) {
                return None;
            }
        }
        let arg = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };

        Some(match name {
            "/start" => Self::Start,
            "/reset" => Self::Reset,
            "/help" => Self::Help,
            "/set_name" => Self::SetName(arg),
            "/set_age" => Self::SetAge(arg),
            "/set_desc" => Self::SetDesc(arg),
            "/myprofile" => Self::MyProfile,
            "/image" => Self::Image(arg),
            "/image_option" => Self::ImageOption(arg),
            "/log" => Self::Log,
            other => Self::Unknown(other.to_string()),
        })
    }
}
