//! mirai-echo
//!
//! Connects one account to a gateway and echoes every chat message back,
//! quoting it. Mostly useful for checking a gateway deployment end to end.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use mirai_link::config::{apply_env_overrides, load_config, load_config_from_path};
use mirai_link::{logging, Bot, ListenScope, SessionState, TransportMode, VERSION};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "mirai-echo",
    version = VERSION,
    about = "Echo bot for a mirai-api-http gateway",
    long_about = None
)]
struct Cli {
    /// Config file (TOML or JSON); defaults to $MIRAI_CONFIG or ./mirai-link.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the transport (poll, push, hybrid)
    #[arg(short, long)]
    transport: Option<TransportMode>,

    /// Which chat messages to echo (all, friend, group, temp)
    #[arg(short, long, default_value = "all")]
    scope: ListenScope,

    /// Echo without quoting the original message
    #[arg(long)]
    no_quote: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from_path(path)
                .with_context(|| format!("loading {}", path.display()))?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }

    logging::init(&config.log)?;
    info!("Starting mirai-echo v{}", VERSION);

    let bot = Bot::connect(config).await?;
    if let SessionState::Failed { reason } = bot.state() {
        bail!("gateway refused the session: {}", reason);
    }
    bot.verify().await.context("binding the session")?;

    let quote = !cli.no_quote;
    bot.on_message(move |message| async move {
        info!(
            from = message.sender.id,
            kind = %message.kind,
            text = %message.text(),
            "echoing"
        );
        let echo = message.chain.without_source();
        let sent = if quote {
            message.quote_reply(echo).await?
        } else {
            message.reply(echo).await?
        };
        if let Some(rejection) = sent.rejection() {
            warn!(code = rejection.code, msg = %rejection.msg, "echo rejected");
        }
        Ok(())
    });

    bot.listen(cli.scope).await?;
    info!("Listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bot.release().await?;
    Ok(())
}
