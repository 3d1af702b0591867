//! clonebot binary.
//!
//! Start the bot with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx REPO_LINK=https://... cargo run -p clonebot-telegram
//! ```

use std::path::PathBuf;

use clap::Parser;
use clonebot_core::{config, require_tools, Settings};
use clonebot_telegram::ClonerBot;
use tracing_subscriber::EnvFilter;

/// clonebot - provision and run app instances from Telegram
#[derive(Parser, Debug)]
#[command(name = "clonebot")]
#[command(about = "Telegram bot that clones, configures and starts an app per premium user")]
struct Args {
    /// Data directory (default: $CLONEBOT_DATA_DIR or ~/.clonebot)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let data_dir = args.data_dir.clone().unwrap_or_else(config::default_data_dir);

    // Secrets from the data directory first, then local .env.local or .env
    let env_path = config::env_file(&data_dir);
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local")
        .or_else(|_| dotenvy::dotenv());

    let filter = match args.verbose {
        0 => "clonebot_telegram=info,clonebot_core=info,teloxide=warn",
        1 => "clonebot_telegram=debug,clonebot_core=debug,teloxide=info",
        2 => "clonebot_telegram=trace,clonebot_core=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env(Some(&data_dir))?;

    if let Err(e) = settings.ensure_all_dirs() {
        tracing::warn!(error = %e, "Failed to create all directories");
    }

    if let Err(e) = require_tools(&["git", settings.package_manager.program()]) {
        tracing::warn!(error = %e, "Provisioning will fail until this is installed");
    }

    let package_manager = settings.package_manager;
    let bot = ClonerBot::new(settings)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\n[robot] clonebot");
            println!("   Bot: @{}", username);
            println!("   Data: {}", data_dir.display());
            println!("   Package manager: {}", package_manager);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    println!("\n[phone] Open Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    bot.start_polling().await?;

    Ok(())
}
