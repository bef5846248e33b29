//! Logging setup.
//!
//! Structured logging via tracing, with noisy transport crates filtered to
//! `warn` so business logs stay readable at `debug`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Noisy library modules clamped to warn level.
///
/// These produce high-volume connection-pool and TLS logs with no business
/// context.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Build the default EnvFilter with noise suppression.
///
/// `RUST_LOG` overrides everything when set.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }

    EnvFilter::new(&directives)
}

/// Initialize logging.
///
/// # Arguments
/// * `log_level` - base level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured output, anything else for pretty
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(log_level = %log_level, log_format = %log_format, "Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_noise_suppression() {
        std::env::remove_var("RUST_LOG");
        let filter = build_filter("debug");
        let s = format!("{filter}");
        assert!(s.contains("debug"));
        assert!(s.contains("hyper=warn"));
    }
}
