//! Settings and on-disk layout for clonebot.
//!
//! # Storage Structure
//!
//! All bot data lives under one data directory (default `~/.clonebot/`):
//!
//! ```text
//! ~/.clonebot/
//! ├── json/
//! │   ├── prem.json       # Premium user IDs
//! │   └── tokens.json     # Redeemable tokens
//! ├── user_folders/       # One clone of REPO_LINK per user
//! ├── images/             # Banner for /start
//! └── config/.env.local   # Secrets
//! ```
//!
//! # Environment Variables
//!
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather (required by the bot)
//! - `REPO_LINK`: Repository cloned into every user folder (required)
//! - `CLONEBOT_DATA_DIR`: Override the data directory
//! - `CLONEBOT_OWNER_IDS`: Comma-separated owner user IDs
//! - `CLONEBOT_PACKAGE_MANAGER`: `npm` (default) or `yarn`
//! - `CLONEBOT_START_IMAGE`: Banner photo for /start
//! - `CLONEBOT_START_GRACE_SECS`: Seconds to watch a new instance for failure
//! - `CLONEBOT_START_COMMAND`: Command that starts the app instead of `<pm> start`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Environment variable for the repository to clone.
pub const REPO_LINK_ENV: &str = "REPO_LINK";

/// Environment variable for a custom data directory.
pub const DATA_DIR_ENV: &str = "CLONEBOT_DATA_DIR";

/// Environment variable for owner user IDs.
pub const OWNER_IDS_ENV: &str = "CLONEBOT_OWNER_IDS";

/// Environment variable for the package manager.
pub const PACKAGE_MANAGER_ENV: &str = "CLONEBOT_PACKAGE_MANAGER";

/// Environment variable for the /start banner image.
pub const START_IMAGE_ENV: &str = "CLONEBOT_START_IMAGE";

/// Environment variable for the launch grace period.
pub const START_GRACE_ENV: &str = "CLONEBOT_START_GRACE_SECS";

/// Environment variable for a custom start command.
pub const START_COMMAND_ENV: &str = "CLONEBOT_START_COMMAND";

/// Default data directory name under home.
const DEFAULT_DATA_DIR: &str = ".clonebot";

/// Default launch grace period in seconds.
const DEFAULT_START_GRACE_SECS: u64 = 10;

const JSON_SUBDIR: &str = "json";
const USERS_SUBDIR: &str = "user_folders";
const IMAGES_SUBDIR: &str = "images";
const CONFIG_SUBDIR: &str = "config";

/// Package manager used to install and start the cloned application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
}

impl PackageManager {
    /// Binary name.
    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
        }
    }

    /// Arguments for starting the application.
    pub fn start_args(&self) -> Vec<String> {
        vec!["start".to_string()]
    }

    /// Arguments for installing dependencies.
    pub fn install_args(&self) -> Vec<String> {
        vec!["install".to_string()]
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for PackageManager {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" => Ok(PackageManager::Npm),
            "yarn" => Ok(PackageManager::Yarn),
            other => Err(CoreError::Config(format!(
                "unknown package manager '{}' (expected npm or yarn)",
                other
            ))),
        }
    }
}

/// Runtime settings shared by the bot and its handlers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Repository cloned into each user folder.
    pub repo_link: String,
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Users allowed to run owner commands.
    pub owner_ids: Vec<u64>,
    /// Package manager for install/start.
    pub package_manager: PackageManager,
    /// Banner photo for /start.
    pub start_image: PathBuf,
    /// How long a fresh instance is watched for early failure.
    pub start_grace: Duration,
    /// Program and arguments replacing `<pm> start`, run in the user folder.
    pub start_command: Option<Vec<String>>,
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// `data_dir_override` takes precedence over `CLONEBOT_DATA_DIR`.
    pub fn from_env(data_dir_override: Option<&Path>) -> Result<Self> {
        let repo_link = std::env::var(REPO_LINK_ENV)
            .map_err(|_| CoreError::Config(format!("{} not set", REPO_LINK_ENV)))?;

        let data_dir = match data_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => default_data_dir(),
        };

        let mut settings = Self::with_data_dir(repo_link, data_dir);

        if let Ok(raw) = std::env::var(OWNER_IDS_ENV) {
            settings.owner_ids = parse_owner_ids(&raw)?;
        }
        if let Ok(raw) = std::env::var(PACKAGE_MANAGER_ENV) {
            settings.package_manager = raw.parse()?;
        }
        if let Ok(raw) = std::env::var(START_IMAGE_ENV) {
            settings.start_image = PathBuf::from(shellexpand::tilde(&raw).into_owned());
        }
        if let Ok(raw) = std::env::var(START_GRACE_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("{} must be a number of seconds", START_GRACE_ENV))
            })?;
            settings.start_grace = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var(START_COMMAND_ENV) {
            settings.start_command = parse_start_command(&raw);
        }

        Ok(settings)
    }

    /// Settings rooted at `data_dir` with defaults for everything else.
    pub fn with_data_dir(repo_link: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            repo_link: repo_link.into(),
            start_image: data_dir.join(IMAGES_SUBDIR).join("banner.jpg"),
            data_dir,
            owner_ids: Vec::new(),
            package_manager: PackageManager::default(),
            start_grace: Duration::from_secs(DEFAULT_START_GRACE_SECS),
            start_command: None,
        }
    }

    /// Program and arguments that start a user's application.
    pub fn start_command_line(&self) -> (String, Vec<String>) {
        match self.start_command.as_deref() {
            Some([program, args @ ..]) => (program.clone(), args.to_vec()),
            _ => (
                self.package_manager.program().to_string(),
                self.package_manager.start_args(),
            ),
        }
    }

    /// Directory holding the JSON allow-lists.
    pub fn json_dir(&self) -> PathBuf {
        self.data_dir.join(JSON_SUBDIR)
    }

    /// Premium users file.
    pub fn premium_file(&self) -> PathBuf {
        self.json_dir().join("prem.json")
    }

    /// Redeemable tokens file.
    pub fn tokens_file(&self) -> PathBuf {
        self.json_dir().join("tokens.json")
    }

    /// Parent of all user folders.
    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join(USERS_SUBDIR)
    }

    /// Config directory.
    pub fn config_dir(&self) -> PathBuf {
        self.data_dir.join(CONFIG_SUBDIR)
    }

    /// Whether `user_id` may run owner commands.
    pub fn is_owner(&self, user_id: u64) -> bool {
        self.owner_ids.contains(&user_id)
    }

    /// Ensure the data directory and all subdirectories exist.
    pub fn ensure_all_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.json_dir())?;
        std::fs::create_dir_all(self.users_dir())?;
        std::fs::create_dir_all(self.data_dir.join(IMAGES_SUBDIR))?;
        std::fs::create_dir_all(self.config_dir())?;
        Ok(())
    }
}

/// Get the data directory.
///
/// Determined by:
/// 1. `CLONEBOT_DATA_DIR` environment variable if set (`~` is expanded)
/// 2. `~/.clonebot` if home directory is available
/// 3. `.clonebot` in current directory as fallback
pub fn default_data_dir() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(|raw| PathBuf::from(shellexpand::tilde(&raw).into_owned()))
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(DEFAULT_DATA_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
        })
}

/// Get the `.env.local` path inside a data directory.
pub fn env_file(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_SUBDIR).join(".env.local")
}

/// Parse a comma-separated list of user IDs. Blank entries are skipped.
pub fn parse_owner_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| CoreError::Config(format!("invalid owner id '{}'", s)))
        })
        .collect()
}

/// Split a start command on whitespace. Blank input means the default.
pub fn parse_start_command(raw: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}
