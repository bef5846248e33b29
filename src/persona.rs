//! Persona system prompt assembly.
//!
//! Templates use explicit named placeholders (`{name}`, `{age}`,
//! `{description}`, `{user_title}`) resolved against a typed context.
//! Substituted values are inserted verbatim and never re-scanned, so braces
//! in user-supplied description text cannot corrupt later substitutions.
//! A placeholder without a value is a hard error, never silently skipped.

use crate::config::PersonaConfig;
use crate::error::{Error, Result};
use crate::session::UserProfile;
use regex::Regex;

const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_]+)\}";

/// Values a persona template can reference.
#[derive(Debug, Clone)]
pub struct PersonaContext {
    pub name: String,
    pub age: String,
    pub description: String,
    pub user_title: String,
}

impl PersonaContext {
    fn get(&self, key: &str) -> Option<&str> {
        match key {
            "name" => Some(&self.name),
            "age" => Some(&self.age),
            "description" => Some(&self.description),
            "user_title" => Some(&self.user_title),
            _ => None,
        }
    }
}

/// A persona template with named placeholders.
#[derive(Debug, Clone)]
pub struct PersonaTemplate {
    template: String,
}

impl PersonaTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Resolve every placeholder against the context.
    ///
    /// Unknown placeholders produce `Error::Template` naming the offending
    /// key; literal text is passed through untouched.
    pub fn render(&self, ctx: &PersonaContext) -> Result<String> {
        let re = Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid");
        let mut out = String::with_capacity(self.template.len() + 64);
        let mut last = 0;

        for caps in re.captures_iter(&self.template) {
            let whole = caps.get(0).expect("capture 0 always present");
            out.push_str(&self.template[last..whole.start()]);

            let key = &caps[1];
            match ctx.get(key) {
                Some(value) => out.push_str(value),
                None => return Err(Error::Template(key.to_string())),
            }
            last = whole.end();
        }
        out.push_str(&self.template[last..]);
        Ok(out)
    }
}

/// How the bot addresses the requester, derived from their display name.
pub fn user_title(cfg: &PersonaConfig, display_name: &str) -> String {
    if cfg.honorific.is_empty() {
        display_name.to_string()
    } else {
        format!("{display_name}{}", cfg.honorific)
    }
}

/// Render the effective system prompt for one user.
///
/// Profile overrides are merged over the configured defaults. The
/// description is always base description plus the user's appended fragment.
/// A selected preset contributes only an attribution note; it never
/// overrides persona fields.
pub fn system_prompt(
    cfg: &PersonaConfig,
    profile: &UserProfile,
    display_name: &str,
    preset_note: Option<&str>,
) -> Result<String> {
    let template = profile.system_prompt.as_deref().unwrap_or(&cfg.template);
    let ctx = PersonaContext {
        name: profile.name.clone().unwrap_or_else(|| cfg.name.clone()),
        age: profile
            .age
            .map_or_else(|| cfg.age.to_string(), |a| a.to_string()),
        description: profile.full_description(&cfg.base_description),
        user_title: user_title(cfg, display_name),
    };

    let mut prompt = PersonaTemplate::new(template).render(&ctx)?;
    if let Some(note) = preset_note {
        prompt.push(' ');
        prompt.push_str(note);
    }
    Ok(prompt)
}
