//! Telegram bot interface for clonebot.
//!
//! Premium users get their own clone of a configured repository, upload a
//! `creds.json` over chat and have the application started for them.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather
//! - `REPO_LINK`: Repository cloned for every user
//!
//! Optional:
//! - `CLONEBOT_DATA_DIR`: Data directory (default: `~/.clonebot`)
//! - `CLONEBOT_OWNER_IDS`: Owner user IDs, comma-separated
//! - `CLONEBOT_PACKAGE_MANAGER`: `npm` (default) or `yarn`
//!
//! # Example
//!
//! ```no_run
//! use clonebot_core::Settings;
//! use clonebot_telegram::ClonerBot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env(None)?;
//!     let bot = ClonerBot::new(settings)?;
//!     bot.start_polling().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Commands
//!
//! - `/start` - Banner and command list
//! - `/status` - Premium and bot status
//! - `/addsession` - Clone the app and upload creds.json (premium)
//! - `/connect` - Start the app from the stored session (premium)
//! - `/delsession` - Stop the app and delete its session (premium)
//! - `/redeem <token>` - Redeem a premium token
//! - `/ping`, `/uptime`

pub mod bot;
pub mod error;
pub mod handlers;
pub mod session;
pub mod state;

pub use bot::ClonerBot;
pub use error::{Result, TelegramError};
pub use handlers::Command;
pub use session::UserSession;
pub use state::{create_shared_state, LaunchReport, RedeemOutcome, TelegramState, WorkspaceStatus};
