//! Shared state for the Telegram bot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clonebot_core::{
    CoreError, Instance, LaunchOutcome, PremiumUsers, Settings, TokenStore, UserWorkspace,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::session::UserSession;

/// Most tokens an owner can mint with one command.
pub const MAX_TOKENS_PER_REQUEST: usize = 20;

/// Outcome of a `/redeem` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Token consumed, premium granted.
    Redeemed,
    /// The user already had premium; the token was left untouched.
    AlreadyPremium,
    /// No such token.
    InvalidToken,
}

/// How a launch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchReport {
    /// Running under the bot, with this PID.
    Running(Option<u32>),
    /// The start script handed off to something else and exited.
    Detached,
}

/// Snapshot of a user's workspace for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceStatus {
    pub cloned: bool,
    pub has_creds: bool,
    pub running_pid: Option<u32>,
    /// When the running instance was spawned.
    pub running_since: Option<DateTime<Utc>>,
}

/// Shared state for the Telegram bot, accessible across all handlers.
pub struct TelegramState {
    /// Settings loaded at startup.
    settings: Settings,
    /// Premium user allow-list.
    premium: PremiumUsers,
    /// Redeemable tokens.
    tokens: TokenStore,
    /// Per-user state (user_id -> session).
    sessions: RwLock<HashMap<u64, UserSession>>,
    /// When the bot process started.
    started_at: Instant,
}

impl TelegramState {
    /// Create a new TelegramState instance.
    pub fn new(settings: Settings) -> Self {
        let premium = PremiumUsers::new(settings.premium_file());
        let tokens = TokenStore::new(settings.tokens_file());

        Self {
            settings,
            premium,
            tokens,
            sessions: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Time since the bot started.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Workspace for `user_id`.
    pub fn workspace(&self, user_id: u64) -> UserWorkspace {
        UserWorkspace::new(&self.settings.users_dir(), user_id)
    }

    // --- Access control ---

    /// Check if a user has premium access.
    pub async fn is_premium(&self, user_id: u64) -> bool {
        self.premium.is_premium(user_id).await
    }

    /// Check if a user may run owner commands.
    pub fn is_owner(&self, user_id: u64) -> bool {
        self.settings.is_owner(user_id)
    }

    /// Grant premium. Returns false if already granted.
    pub async fn grant_premium(&self, user_id: u64) -> Result<bool> {
        let added = self.premium.grant(user_id).await?;
        info!(user_id = user_id, added = added, "Premium granted");
        Ok(added)
    }

    /// Revoke premium. Returns false if the user wasn't premium.
    pub async fn revoke_premium(&self, user_id: u64) -> Result<bool> {
        let removed = self.premium.revoke(user_id).await?;
        info!(user_id = user_id, removed = removed, "Premium revoked");
        Ok(removed)
    }

    /// Exchange a token for premium access.
    pub async fn redeem(&self, user_id: u64, token: &str) -> Result<RedeemOutcome> {
        if self.is_premium(user_id).await {
            return Ok(RedeemOutcome::AlreadyPremium);
        }

        if !self.tokens.consume(token).await? {
            debug!(user_id = user_id, "Invalid redeem token");
            return Ok(RedeemOutcome::InvalidToken);
        }

        self.premium.grant(user_id).await?;
        info!(user_id = user_id, "Token redeemed");
        Ok(RedeemOutcome::Redeemed)
    }

    /// Mint `count` tokens (clamped to 1..=MAX_TOKENS_PER_REQUEST).
    pub async fn generate_tokens(&self, count: usize) -> Result<Vec<String>> {
        let count = count.clamp(1, MAX_TOKENS_PER_REQUEST);
        Ok(self.tokens.generate(count).await?)
    }

    /// Outstanding tokens.
    pub async fn list_tokens(&self) -> Vec<String> {
        self.tokens.list().await
    }

    /// All premium user IDs.
    pub async fn list_premium(&self) -> Vec<u64> {
        self.premium.list().await
    }

    // --- Awaiting-input flag ---

    /// Whether the user's next text is creds.json content.
    pub async fn is_awaiting(&self, user_id: u64) -> bool {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|s| s.awaiting_creds)
            .unwrap_or(false)
    }

    /// Start waiting for creds.json from this user.
    pub async fn expect_creds(&self, user_id: u64) {
        self.sessions.write().await.entry(user_id).or_default().expect_creds();
        debug!(user_id = user_id, "Awaiting creds.json");
    }

    /// Stop waiting for creds.json. Returns whether the flag was set.
    pub async fn clear_awaiting(&self, user_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&user_id) else {
            return false;
        };
        let was_set = session.awaiting_creds;
        session.clear_awaiting();
        if session.is_empty() {
            sessions.remove(&user_id);
        }
        was_set
    }

    /// Store creds.json content for a user who is awaiting it.
    ///
    /// Clears the awaiting flag unless the content was rejected as invalid
    /// JSON, in which case the user may simply resend it.
    pub async fn store_creds(&self, user_id: u64, content: &str) -> Result<PathBuf> {
        let result = self.workspace(user_id).write_creds(content).await;
        match &result {
            Err(CoreError::InvalidCreds(_)) => {}
            _ => {
                self.clear_awaiting(user_id).await;
            }
        }
        Ok(result?)
    }

    // --- Instances ---

    /// Launch (or relaunch) the user's application.
    ///
    /// Any instance already tracked for the user is stopped first.
    pub async fn launch_instance(&self, user_id: u64) -> Result<LaunchReport> {
        self.stop_instance(user_id).await?;

        let workspace = self.workspace(user_id);
        let pm = self.settings.package_manager;

        if workspace.install_dependencies(pm).await? {
            debug!(user_id = user_id, "Dependencies installed before launch");
        }

        let (program, args) = self.settings.start_command_line();
        let outcome = workspace.launch(&program, &args, self.settings.start_grace).await?;

        let report = match outcome {
            LaunchOutcome::Running(instance) => {
                let pid = instance.pid();
                self.sessions.write().await.entry(user_id).or_default().instance = Some(instance);
                LaunchReport::Running(pid)
            }
            LaunchOutcome::Detached => LaunchReport::Detached,
        };
        info!(user_id = user_id, report = ?report, "Instance launched");
        Ok(report)
    }

    /// Stop the user's running instance. Returns false if none was running.
    pub async fn stop_instance(&self, user_id: u64) -> Result<bool> {
        // Take it out so the stop doesn't hold the map lock.
        let instance = self
            .sessions
            .write()
            .await
            .get_mut(&user_id)
            .and_then(|s| s.instance.take());

        let Some(mut instance) = instance else {
            return Ok(false);
        };

        // Stopped even if the leader is gone, to catch what it left behind.
        let was_running = instance.is_running();
        instance.stop().await?;
        info!(user_id = user_id, pid = ?instance.pid(), was_running = was_running, "Instance stopped");
        Ok(was_running)
    }

    /// PID of the user's running instance.
    pub async fn running_pid(&self, user_id: u64) -> Option<u32> {
        self.sessions
            .write()
            .await
            .get_mut(&user_id)
            .and_then(UserSession::running_pid)
    }

    /// Workspace details for `/status`.
    pub async fn workspace_status(&self, user_id: u64) -> WorkspaceStatus {
        let workspace = self.workspace(user_id);
        let mut sessions = self.sessions.write().await;
        let running = sessions.get_mut(&user_id).and_then(UserSession::running_instance);

        WorkspaceStatus {
            cloned: workspace.is_cloned(),
            has_creds: workspace.has_creds(),
            running_pid: running.and_then(Instance::pid),
            running_since: running.map(Instance::started_at),
        }
    }

    /// Users with a live instance, for shutdown logging.
    pub async fn running_instances(&self) -> Vec<(u64, Option<u32>)> {
        let mut sessions = self.sessions.write().await;
        let mut running: Vec<_> = sessions
            .iter_mut()
            .filter_map(|(&user_id, session)| session.running_pid().map(|pid| (user_id, Some(pid))))
            .collect();
        running.sort_unstable();
        if !running.is_empty() {
            warn!(count = running.len(), "Instances still running");
        }
        running
    }
}

/// Create a shared state wrapped in Arc.
pub fn create_shared_state(settings: Settings) -> Arc<TelegramState> {
    Arc::new(TelegramState::new(settings))
}
