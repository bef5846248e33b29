use clap::Parser;
use persona_bot::bot::Bot;
use persona_bot::config::Config;
use persona_bot::logging;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "persona-bot", version, about = "Telegram persona chat bot")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "persona-bot.json")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format override ("pretty" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, config_found) = Config::load(&args.config)?;
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = args
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    logging::init_logging(log_level, log_format);

    if !config_found {
        tracing::warn!(path = %args.config.display(), "Config file not found, using defaults");
    }

    config.validate()?;

    tracing::info!(
        model = %config.model.model,
        base_url = %config.model.base_url,
        "Starting persona-bot"
    );

    let bot = Arc::new(Bot::new(config).await);

    tokio::select! {
        result = bot.run() => {
            result?;
            tracing::info!("Listener exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
