//! Main Telegram bot implementation.

use std::sync::Arc;

use clonebot_core::Settings;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::error::{Result, TelegramError};
use crate::handlers::{handle_command, handle_creds, handle_unknown, is_awaiting_creds, Command};
use crate::state::{create_shared_state, TelegramState};

/// The clonebot Telegram bot.
pub struct ClonerBot {
    /// The teloxide bot instance.
    bot: Bot,
    /// Shared state across handlers.
    state: Arc<TelegramState>,
}

impl ClonerBot {
    /// Create a new bot from settings.
    ///
    /// Requires `TELEGRAM_BOT_TOKEN` environment variable to be set.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_state(create_shared_state(settings))
    }

    /// Create a bot with custom state (for testing).
    pub fn with_state(state: Arc<TelegramState>) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| TelegramError::NoToken)?;
        if token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }

        Ok(Self {
            bot: Bot::new(token),
            state,
        })
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self.bot.get_me().await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Start the bot in long-polling mode. Returns after Ctrl+C.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Telegram bot in polling mode...");

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!(error = %e, "Failed to register command menu");
        }

        let bot = self.bot.clone();
        let state_for_filter = Arc::clone(&self.state);
        let state_for_creds = Arc::clone(&self.state);
        let state_for_commands = Arc::clone(&self.state);

        // Awaiting-input comes first: while a user owes us creds.json, every
        // text they send is file content, even if it looks like a command.
        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_async(move |msg: Message| {
                        let state = Arc::clone(&state_for_filter);
                        async move { is_awaiting_creds(&msg, &state).await }
                    })
                    .endpoint(move |bot: Bot, msg: Message| {
                        let state = Arc::clone(&state_for_creds);
                        info!(chat_id = %msg.chat.id, "creds.json content received");
                        async move { handle_creds(bot, msg, state).await }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let state = Arc::clone(&state_for_commands);
                        info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);
                        async move { handle_command(bot, msg, cmd, state).await }
                    }),
            )
            .branch(
                Update::filter_message()
                    .endpoint(|bot: Bot, msg: Message| async move { handle_unknown(bot, msg).await }),
            );

        info!("Bot is running! Send /start to begin.");

        Dispatcher::builder(bot, handler)
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd);
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        self.shutdown().await;
        Ok(())
    }

    /// Log what is left behind on exit. Instances keep running.
    async fn shutdown(&self) {
        let running = self.state.running_instances().await;
        for (user_id, pid) in &running {
            info!(user_id = %user_id, pid = ?pid, "Leaving instance running");
        }
        info!(running = running.len(), "Bot stopped");
    }
}
