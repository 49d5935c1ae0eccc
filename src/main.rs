//! # Funnelcast — Telegram funnel bot with scheduled broadcasts
//!
//! One process runs three things: the long-polling update loop feeding the
//! funnel handlers, the broadcast scheduler ticking once a minute, and the
//! shared SQLite store the (external) admin console edits.
//!
//! Usage:
//!   funnelcast                         # Default config (~/.funnelcast/config.toml)
//!   funnelcast --config bot.toml       # Explicit config file
//!   funnelcast --tick-secs 10          # Faster scheduler polling

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use funnelcast_bot::BotHandler;
use funnelcast_core::FunnelcastConfig;
use funnelcast_db::BotDb;
use funnelcast_scheduler::SchedulerEngine;
use funnelcast_telegram::TelegramBot;

#[derive(Parser)]
#[command(
    name = "funnelcast",
    version,
    about = "📢 Funnelcast — Telegram funnel bot with scheduled broadcasts"
)]
struct Cli {
    /// Config file path (default ~/.funnelcast/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Scheduler tick interval in seconds (overrides config)
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "funnelcast=debug,funnelcast_scheduler=debug,funnelcast_bot=debug,funnelcast_db=debug,funnelcast_telegram=debug"
    } else {
        "funnelcast=info,funnelcast_scheduler=info,funnelcast_bot=info,funnelcast_db=info,funnelcast_telegram=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Load config
    let mut config = match &cli.config {
        Some(path) => {
            let mut c = FunnelcastConfig::load_from(Path::new(&expand_path(path)))
                .with_context(|| format!("loading config from {path}"))?;
            c.apply_env();
            c
        }
        None => FunnelcastConfig::load()?,
    };
    if let Some(tick) = cli.tick_secs {
        config.scheduler.tick_secs = tick;
    }
    if config.bot_token.is_empty() {
        bail!("No bot token: set bot_token in the config file or FUNNELCAST_BOT_TOKEN");
    }

    // Open database
    let db_path = expand_path(cli.db.as_deref().unwrap_or(&config.db_path));
    let db = Arc::new(BotDb::open(Path::new(&db_path))?);
    db.ensure_default_content()?;

    // Connect the bot
    let bot = TelegramBot::new(&config.bot_token);
    let me = bot.get_me().await.context("getMe failed; check the token")?;

    println!("📢 Funnelcast v{}", env!("CARGO_PKG_VERSION"));
    println!("   🤖 Bot:       @{}", me.username.as_deref().unwrap_or("unknown"));
    println!("   🗄️  Database:  {db_path}");
    println!(
        "   🚪 Gate:      {}",
        config.gate_channel.as_deref().unwrap_or("disabled")
    );
    println!("   ⏰ Scheduler: every {}s", config.scheduler.tick_secs);
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Scheduler loop in the background; delivery shares the bot client
    let engine = SchedulerEngine::new(db.clone(), Arc::new(bot.clone()), &config.scheduler);
    let scheduler_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    // Update loop in the foreground
    let handler = BotHandler::new(db, bot.clone(), config.gate_channel.clone());
    let mut updates = bot.start_polling();

    loop {
        tokio::select! {
            maybe_update = updates.next_update() => {
                match maybe_update {
                    Some(update) => {
                        if let Err(e) = handler.handle_update(update).await {
                            tracing::error!("Update handling failed: {e}");
                        }
                    }
                    None => {
                        tracing::error!("Polling stream closed; shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n🛑 Shutting down...");
                break;
            }
        }
    }

    // Let an in-flight tick finish; no new tick begins after this
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    println!("✅ Stopped");

    Ok(())
}
