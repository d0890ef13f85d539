//! Parlor bot binary.
//!
//! Start the bot with:
//! ```bash
//! PARLOR_BOT_TOKEN=xxx PARLOR_OPERATOR_CHAT_ID=12345 cargo run -p parlor-bot
//! ```

use clap::Parser;
use parlor_bot::ParlorBot;
use parlor_core::config;
use tracing_subscriber::EnvFilter;

/// Parlor - anonymous visitor chat brokered through your Telegram
#[derive(Parser, Debug)]
#[command(name = "parlor-bot")]
#[command(about = "Broker anonymous visitor chats into a Telegram chat you control")]
struct Args {
    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load environment variables from .env.local or .env if present
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    // Initialize logging based on verbosity
    let filter = match args.verbose {
        0 => "parlor=info,parlor_bot=info,teloxide=warn",
        1 => "parlor=debug,parlor_bot=debug,teloxide=info",
        2 => "parlor=trace,parlor_bot=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let state_dir = config::state_dir();
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        tracing::warn!(path = %state_dir.display(), error = %e, "Could not create state directory");
    }

    let bot = ParlorBot::from_env(&state_dir)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\nParlor bot");
            println!("   Bot: @{}", username);
            println!("   State: {}", state_dir.display());
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    let restored = bot.restore().await?;
    if restored > 0 {
        println!("   Restored {} open room(s) from the last snapshot", restored);
    }

    println!("\nReply to room notifications in Telegram to act on them");
    println!("   Press Ctrl+C to stop\n");

    bot.start_polling().await?;

    Ok(())
}
