//! clonebot core - everything the chat front-end needs that isn't chat.
//!
//! - **access**: JSON-backed premium user and redeem token lists
//! - **config**: Settings from the environment and the data directory layout
//! - **process**: One-shot commands and long-lived application instances
//! - **uptime**: Uptime formatting
//! - **workspace**: Per-user clone, session folder and creds.json handling

pub mod access;
pub mod config;
pub mod error;
pub mod process;
pub mod uptime;
pub mod workspace;

pub use access::{generate_token, JsonListStore, PremiumUsers, TokenStore};
pub use config::{PackageManager, Settings};
pub use error::{CoreError, Result};
pub use process::{require_tools, Instance, LaunchOutcome};
pub use uptime::format_uptime;
pub use workspace::{CloneStatus, UserWorkspace};
