//! Command handlers for the Telegram bot.

use std::sync::Arc;
use std::time::Instant;

use clonebot_core::{format_uptime, CloneStatus, CoreError};
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelegramError};
use crate::state::{LaunchReport, RedeemOutcome, TelegramState, MAX_TOKENS_PER_REQUEST};

const NOT_PREMIUM: &str = "❌ This command is only available for premium users. Contact the owner.";
const UNKNOWN_COMMAND: &str = "🚫 Unknown command. Use /start to see available commands.";
const UNEXPECTED_ERROR: &str = "⚠️ An unexpected error occurred. Please try again later.";

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show the banner and command list")]
    Start,

    #[command(description = "Show help message")]
    Help,

    #[command(description = "Show your premium and bot status")]
    Status,

    #[command(description = "Clone the app and upload a session (premium)")]
    AddSession,

    #[command(description = "Start your bot from the stored session (premium)")]
    Connect,

    #[command(description = "Stop your bot and delete its session (premium)")]
    DelSession,

    #[command(description = "Redeem a premium token: /redeem <TOKEN>")]
    Redeem(String),

    #[command(description = "Check bot latency")]
    Ping,

    #[command(description = "Show how long the bot has been running")]
    Uptime,

    #[command(description = "Stop waiting for creds.json")]
    Cancel,

    #[command(hide)]
    AddPrem(String),

    #[command(hide)]
    DelPrem(String),

    #[command(hide)]
    GenToken(String),

    #[command(hide)]
    Tokens,
}

/// Telegram user ID of the sender.
pub fn sender_id(msg: &Message) -> Option<u64> {
    msg.from.as_ref().map(|u| u.id.0)
}

/// Banner shown by /start.
fn start_banner() -> String {
    "┏━『 ★ CLONEBOT ★ 』━┓\n\
    ▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀▀\n\
    \x20   Available Commands:\n\
    \x20   ◈  /addsession\n\
    \x20   ◈  /connect\n\
    \x20   ◈  /delsession\n\
    \x20   ◈  /status\n\
    \x20   ◈  /redeem <token>\n\
    \x20   ◈  /uptime\n\
    \x20   ◈  /ping\n\
    ▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄"
        .to_string()
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, state: Arc<TelegramState>) -> Result<()> {
    let banner = start_banner();
    let image = &state.settings().start_image;

    if image.is_file() {
        bot.send_photo(msg.chat.id, InputFile::file(image.clone()))
            .caption(banner)
            .await?;
    } else {
        debug!(path = %image.display(), "Banner image missing, sending text");
        bot.send_message(msg.chat.id, banner).await?;
    }

    info!(chat_id = %msg.chat.id, user = ?msg.from.as_ref().map(|u| &u.username), "User started bot");
    Ok(())
}

/// Handle the /help command.
pub async fn handle_help(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

/// Handle the /status command.
pub async fn handle_status(bot: Bot, msg: Message, state: Arc<TelegramState>, user_id: u64) -> Result<()> {
    if !state.is_premium(user_id).await {
        bot.send_message(msg.chat.id, "❌ You are not a premium user. Contact the owner.")
            .await?;
        return Ok(());
    }

    let status = state.workspace_status(user_id).await;
    let instance = match (status.running_pid, status.running_since) {
        (Some(pid), Some(since)) => format!(
            "🟢 Bot: running (pid {}, since {})",
            pid,
            since.format("%Y-%m-%d %H:%M UTC")
        ),
        (Some(pid), None) => format!("🟢 Bot: running (pid {})", pid),
        (None, _) => "⚪ Bot: not running".to_string(),
    };

    let text = format!(
        "✅ You are a premium user!\n\n\
        📁 Files: {}\n\
        🔑 Session: {}\n\
        {}",
        if status.cloned { "ready" } else { "not set up (use /addsession)" },
        if status.has_creds { "stored" } else { "missing" },
        instance,
    );

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle the /addsession command: folder, clone, session dir, then wait for creds.json.
pub async fn handle_addsession(bot: Bot, msg: Message, state: Arc<TelegramState>, user_id: u64) -> Result<()> {
    if !state.is_premium(user_id).await {
        bot.send_message(msg.chat.id, NOT_PREMIUM).await?;
        return Ok(());
    }

    let workspace = state.workspace(user_id);
    workspace.create().await?;

    bot.send_message(msg.chat.id, "🔄 Setting up files...").await?;

    let setup = async {
        let status = workspace.clone_repo(&state.settings().repo_link).await?;
        workspace.create_session_dir().await?;
        Ok::<_, CoreError>(status)
    }
    .await;

    match setup {
        Ok(status) => {
            bot.send_message(msg.chat.id, "✅ DONE").await?;
            state.expect_creds(user_id).await;
            bot.send_message(
                msg.chat.id,
                "📂 Session directory created. Please send your creds.json file:",
            )
            .await?;
            info!(
                user_id = user_id,
                fresh_clone = status == CloneStatus::Cloned,
                "Workspace prepared"
            );
        }
        Err(e) => {
            error!(user_id = user_id, error = %e, "Error during /addsession");
            bot.send_message(msg.chat.id, "⚠️ Failed to setup files. Please try again.")
                .await?;
        }
    }

    Ok(())
}

/// Launch the user's bot and report how it went.
async fn start_instance(bot: &Bot, msg: &Message, state: &TelegramState, user_id: u64) -> Result<()> {
    let pm = state.settings().package_manager;
    bot.send_message(msg.chat.id, "🔄 starting bot👀").await?;

    match state.launch_instance(user_id).await {
        Ok(report) => {
            let detail = match report {
                LaunchReport::Running(Some(pid)) => format!(" (pid {})", pid),
                LaunchReport::Running(None) => String::new(),
                LaunchReport::Detached => " (running in background)".to_string(),
            };
            bot.send_message(
                msg.chat.id,
                format!("✅ {} start executed successfully.{}", pm, detail),
            )
            .await?;
        }
        Err(e) => {
            error!(user_id = user_id, error = %e, "Error running {} start", pm);
            let reason = match &e {
                TelegramError::Core(CoreError::InstanceExited { log_tail, .. }) if !log_tail.is_empty() => {
                    format!("\n\nLast output:\n{}", log_tail)
                }
                _ => String::new(),
            };
            bot.send_message(
                msg.chat.id,
                format!("⚠️ Failed to store content or run {} start. Please try again.{}", pm, reason),
            )
            .await?;
        }
    }

    Ok(())
}

/// Handle text sent while the user is awaiting creds.json.
pub async fn handle_creds(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let (Some(user_id), Some(text)) = (sender_id(&msg), msg.text()) else {
        return Ok(());
    };

    let result = receive_creds(&bot, &msg, &state, user_id, text.trim()).await;
    recover(&bot, &msg, &state, user_id, result).await
}

async fn receive_creds(
    bot: &Bot,
    msg: &Message,
    state: &TelegramState,
    user_id: u64,
    text: &str,
) -> Result<()> {
    if text == "/cancel" {
        state.clear_awaiting(user_id).await;
        bot.send_message(msg.chat.id, "❎ Cancelled. Use /addsession to start over.")
            .await?;
        return Ok(());
    }

    match state.store_creds(user_id, text).await {
        Ok(path) => {
            debug!(user_id = user_id, path = %path.display(), "creds.json written");
            bot.send_message(msg.chat.id, "✅ creds.json stored successfully.")
                .await?;
            start_instance(bot, msg, state, user_id).await
        }
        Err(TelegramError::Core(CoreError::InvalidCreds(e))) => {
            debug!(user_id = user_id, error = %e, "Rejected creds.json");
            bot.send_message(
                msg.chat.id,
                "⚠️ That isn't valid JSON. Please send the contents of creds.json again, or /cancel.",
            )
            .await?;
            Ok(())
        }
        Err(e) => {
            error!(user_id = user_id, error = %e, "Error storing creds.json");
            bot.send_message(
                msg.chat.id,
                format!(
                    "⚠️ Failed to store content or run {} start. Please try again.",
                    state.settings().package_manager
                ),
            )
            .await?;
            Ok(())
        }
    }
}

/// Handle the /connect command: relaunch from a stored session.
pub async fn handle_connect(bot: Bot, msg: Message, state: Arc<TelegramState>, user_id: u64) -> Result<()> {
    if !state.is_premium(user_id).await {
        bot.send_message(msg.chat.id, NOT_PREMIUM).await?;
        return Ok(());
    }

    if let Some(pid) = state.running_pid(user_id).await {
        bot.send_message(msg.chat.id, format!("✅ Your bot is already running (pid {}).", pid))
            .await?;
        return Ok(());
    }

    let workspace = state.workspace(user_id);
    if !workspace.is_cloned() || !workspace.has_creds() {
        bot.send_message(
            msg.chat.id,
            "⚠️ No stored session found. Use /addsession first.",
        )
        .await?;
        return Ok(());
    }

    start_instance(&bot, &msg, &state, user_id).await
}

/// Handle the /delsession command.
pub async fn handle_delsession(bot: Bot, msg: Message, state: Arc<TelegramState>, user_id: u64) -> Result<()> {
    if !state.is_premium(user_id).await {
        bot.send_message(msg.chat.id, NOT_PREMIUM).await?;
        return Ok(());
    }

    match state.stop_instance(user_id).await {
        Ok(true) => info!(user_id = user_id, "Stopped instance before deleting session"),
        Ok(false) => {}
        Err(e) => {
            error!(user_id = user_id, error = %e, "Failed to stop instance");
            bot.send_message(
                msg.chat.id,
                "⚠️ Failed to stop your bot, so the session was kept. Please try again.",
            )
            .await?;
            return Ok(());
        }
    }
    state.clear_awaiting(user_id).await;

    let deleted = match state.workspace(user_id).delete_session().await {
        Ok(deleted) => deleted,
        Err(e) => {
            error!(user_id = user_id, error = %e, "Error deleting session folder");
            false
        }
    };

    let reply = if deleted {
        "🗑 Session folder deleted successfully."
    } else {
        "⚠️ Failed to delete session folder. It may not exist."
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle the /redeem command.
pub async fn handle_redeem(
    bot: Bot,
    msg: Message,
    state: Arc<TelegramState>,
    user_id: u64,
    token: String,
) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bot.send_message(msg.chat.id, "Please provide a token.\n\nUsage: /redeem <TOKEN>")
            .await?;
        return Ok(());
    }

    let reply = match state.redeem(user_id, token).await? {
        RedeemOutcome::Redeemed => "🎉 Token redeemed! You are now a premium user.",
        RedeemOutcome::AlreadyPremium => "✅ You are already a premium user.",
        RedeemOutcome::InvalidToken => "❌ Invalid or already used token.",
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle the /ping command by timing a real round trip.
pub async fn handle_ping(bot: Bot, msg: Message) -> Result<()> {
    let sent_at = Instant::now();
    let sent = bot.send_message(msg.chat.id, "🏓 Pong!").await?;
    let latency = sent_at.elapsed().as_millis();

    bot.edit_message_text(msg.chat.id, sent.id, format!("🏓 Pong! Your ping is {}ms", latency))
        .await?;
    Ok(())
}

/// Handle the /uptime command.
pub async fn handle_uptime(bot: Bot, msg: Message, state: Arc<TelegramState>) -> Result<()> {
    bot.send_message(msg.chat.id, format!("⏱ Bot Uptime: {}", format_uptime(state.uptime())))
        .await?;
    Ok(())
}

/// Handle /cancel outside of the creds flow.
pub async fn handle_cancel(bot: Bot, msg: Message, state: Arc<TelegramState>, user_id: u64) -> Result<()> {
    let reply = if state.clear_awaiting(user_id).await {
        "❎ Cancelled. Use /addsession to start over."
    } else {
        "Nothing to cancel."
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Parse a user ID argument.
pub fn parse_user_id(arg: &str) -> Option<u64> {
    arg.trim().parse().ok()
}

/// Parse the /gentoken count: empty means 1, anything else is clamped.
pub fn parse_token_count(arg: &str) -> Option<usize> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Some(1);
    }
    arg.parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .map(|n| n.min(MAX_TOKENS_PER_REQUEST))
}

/// Handle owner-only commands. Non-owners get the unknown command reply.
async fn handle_owner_command(
    bot: Bot,
    msg: Message,
    state: Arc<TelegramState>,
    user_id: u64,
    cmd: Command,
) -> Result<()> {
    if !state.is_owner(user_id) {
        warn!(user_id = user_id, command = ?cmd, "Owner command from non-owner");
        bot.send_message(msg.chat.id, UNKNOWN_COMMAND).await?;
        return Ok(());
    }

    let reply = match cmd {
        Command::AddPrem(arg) => match parse_user_id(&arg) {
            Some(target) => {
                if state.grant_premium(target).await? {
                    format!("✅ {} is now a premium user.", target)
                } else {
                    format!("{} is already a premium user.", target)
                }
            }
            None => "Usage: /addprem <user_id>".to_string(),
        },
        Command::DelPrem(arg) => match parse_user_id(&arg) {
            Some(target) => {
                if state.revoke_premium(target).await? {
                    format!("🗑 {} is no longer a premium user.", target)
                } else {
                    format!("{} was not a premium user.", target)
                }
            }
            None => "Usage: /delprem <user_id>".to_string(),
        },
        Command::GenToken(arg) => match parse_token_count(&arg) {
            Some(count) => {
                let tokens = state.generate_tokens(count).await?;
                info!(user_id = user_id, count = tokens.len(), "Owner generated tokens");
                format!("🎟 New tokens:\n{}", tokens.join("\n"))
            }
            None => format!("Usage: /gentoken [1-{}]", MAX_TOKENS_PER_REQUEST),
        },
        Command::Tokens => {
            let tokens = state.list_tokens().await;
            if tokens.is_empty() {
                "No outstanding tokens.".to_string()
            } else {
                format!("🎟 Outstanding tokens ({}):\n{}", tokens.len(), tokens.join("\n"))
            }
        }
        _ => return Ok(()),
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle any text that isn't a known command.
pub async fn handle_unknown(bot: Bot, msg: Message) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        debug!(chat_id = %msg.chat.id, text = %text, "Unrecognized input");
        bot.send_message(msg.chat.id, UNKNOWN_COMMAND).await?;
    }
    Ok(())
}

/// Report a failed handler to the user and reset their input state.
async fn recover(
    bot: &Bot,
    msg: &Message,
    state: &TelegramState,
    user_id: u64,
    result: Result<()>,
) -> ResponseResult<()> {
    let Err(e) = result else {
        return Ok(());
    };

    error!(chat_id = %msg.chat.id, user_id = user_id, error = %e, "Error in message handler");
    state.clear_awaiting(user_id).await;

    if let Err(send_err) = bot.send_message(msg.chat.id, UNEXPECTED_ERROR).await {
        warn!(chat_id = %msg.chat.id, error = %send_err, "Failed to report error to user");
    }
    Ok(())
}

/// Dispatch commands to appropriate handlers.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<TelegramState>,
) -> ResponseResult<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    let result = match cmd {
        Command::Start => handle_start(bot.clone(), msg.clone(), Arc::clone(&state)).await,
        Command::Help => handle_help(bot.clone(), msg.clone()).await,
        Command::Status => handle_status(bot.clone(), msg.clone(), Arc::clone(&state), user_id).await,
        Command::AddSession => handle_addsession(bot.clone(), msg.clone(), Arc::clone(&state), user_id).await,
        Command::Connect => handle_connect(bot.clone(), msg.clone(), Arc::clone(&state), user_id).await,
        Command::DelSession => handle_delsession(bot.clone(), msg.clone(), Arc::clone(&state), user_id).await,
        Command::Redeem(token) => handle_redeem(bot.clone(), msg.clone(), Arc::clone(&state), user_id, token).await,
        Command::Ping => handle_ping(bot.clone(), msg.clone()).await,
        Command::Uptime => handle_uptime(bot.clone(), msg.clone(), Arc::clone(&state)).await,
        Command::Cancel => handle_cancel(bot.clone(), msg.clone(), Arc::clone(&state), user_id).await,
        owner_cmd @ (Command::AddPrem(_) | Command::DelPrem(_) | Command::GenToken(_) | Command::Tokens) => {
            handle_owner_command(bot.clone(), msg.clone(), Arc::clone(&state), user_id, owner_cmd).await
        }
    };

    recover(&bot, &msg, &state, user_id, result).await
}

/// Whether `msg` should be routed to the creds.json handler.
pub async fn is_awaiting_creds(msg: &Message, state: &TelegramState) -> bool {
    match (sender_id(msg), msg.text()) {
        (Some(user_id), Some(_)) => state.is_awaiting(user_id).await,
        _ => false,
    }
}
