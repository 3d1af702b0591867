//! Per-user application workspaces.
//!
//! Each user gets `user_folders/<id>/` holding a clone of the configured
//! repository plus a `session/creds.json` supplied over chat.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::PackageManager;
use crate::error::{CoreError, Result};
use crate::process::{self, Instance, LaunchOutcome};

const SESSION_DIR: &str = "session";
const CREDS_FILE: &str = "creds.json";
const LOG_FILE: &str = "instance.log";

/// What `clone_repo` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStatus {
    /// Fresh clone.
    Cloned,
    /// Existing clone was fast-forwarded.
    Updated,
}

/// Filesystem view of one user's workspace.
#[derive(Debug, Clone)]
pub struct UserWorkspace {
    user_id: u64,
    root: PathBuf,
}

impl UserWorkspace {
    /// Workspace for `user_id` under `users_dir`. Nothing is created yet.
    pub fn new(users_dir: &Path, user_id: u64) -> Self {
        Self {
            user_id,
            root: users_dir.join(user_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self) -> PathBuf {
        self.root.join(SESSION_DIR)
    }

    pub fn creds_file(&self) -> PathBuf {
        self.session_dir().join(CREDS_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Whether the workspace folder exists.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Whether the repository has been cloned here.
    pub fn is_cloned(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// Whether a creds.json has been stored.
    pub fn has_creds(&self) -> bool {
        self.creds_file().is_file()
    }

    /// Create the workspace folder.
    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        debug!(user_id = self.user_id, path = %self.root.display(), "workspace folder ready");
        Ok(())
    }

    /// Clone `repo` into the workspace, or fast-forward an existing clone.
    pub async fn clone_repo(&self, repo: &str) -> Result<CloneStatus> {
        if self.is_cloned() {
            process::run_checked("git", &["pull", "--ff-only"], &self.root).await?;
            info!(user_id = self.user_id, "repository updated");
            return Ok(CloneStatus::Updated);
        }

        process::run_checked("git", &["clone", repo, "."], &self.root).await?;
        info!(user_id = self.user_id, path = %self.root.display(), "repository cloned");
        Ok(CloneStatus::Cloned)
    }

    /// Create the `session/` folder.
    pub async fn create_session_dir(&self) -> Result<PathBuf> {
        let dir = self.session_dir();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Store `content` as `session/creds.json`. The content must be JSON.
    pub async fn write_creds(&self, content: &str) -> Result<PathBuf> {
        serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| CoreError::InvalidCreds(e.to_string()))?;

        let path = self.creds_file();
        self.create_session_dir().await?;
        tokio::fs::write(&path, content).await?;
        info!(user_id = self.user_id, path = %path.display(), "creds.json stored");
        Ok(path)
    }

    /// Remove the `session/` folder. Returns false if there was none.
    pub async fn delete_session(&self) -> Result<bool> {
        let dir = self.session_dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(user_id = self.user_id, path = %dir.display(), "session folder deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!(user_id = self.user_id, error = %e, "failed to delete session folder");
                Err(e.into())
            }
        }
    }

    /// Install dependencies unless `node_modules` is already present.
    /// Returns true if an install ran.
    pub async fn install_dependencies(&self, pm: PackageManager) -> Result<bool> {
        if self.root.join("node_modules").is_dir() {
            return Ok(false);
        }
        if !self.root.join("package.json").is_file() {
            debug!(user_id = self.user_id, "no package.json, skipping install");
            return Ok(false);
        }

        let args = pm.install_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        process::run_checked(pm.program(), &args, &self.root).await?;
        info!(user_id = self.user_id, package_manager = %pm, "dependencies installed");
        Ok(true)
    }

    /// Start the application with `program args` from the workspace root.
    pub async fn launch(
        &self,
        program: &str,
        args: &[String],
        grace: std::time::Duration,
    ) -> Result<LaunchOutcome> {
        Instance::spawn(program, args, &self.root, &self.log_file(), grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let ws = UserWorkspace::new(Path::new("/data/user_folders"), 12345);
        assert_eq!(ws.root(), Path::new("/data/user_folders/12345"));
        assert_eq!(ws.session_dir(), PathBuf::from("/data/user_folders/12345/session"));
        assert_eq!(ws.creds_file(), PathBuf::from("/data/user_folders/12345/session/creds.json"));
        assert_eq!(ws.log_file(), PathBuf::from("/data/user_folders/12345/instance.log"));
    }

    #[tokio::test]
    async fn test_create_and_write_creds() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = UserWorkspace::new(tmp.path(), 1);

        assert!(!ws.exists());
        ws.create().await.unwrap();
        assert!(ws.exists());
        assert!(!ws.is_cloned());

        ws.create_session_dir().await.unwrap();
        let path = ws.write_creds(r#"{"me":{"id":"123"}}"#).await.unwrap();
        assert!(ws.has_creds());
        assert_eq!(std::fs::read_to_string(path).unwrap(), r#"{"me":{"id":"123"}}"#);
    }

    #[tokio::test]
    async fn test_write_creds_rejects_non_json() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = UserWorkspace::new(tmp.path(), 2);
        ws.create().await.unwrap();

        let err = ws.write_creds("hello there").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCreds(_)));
        assert!(!ws.has_creds());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = UserWorkspace::new(tmp.path(), 3);
        ws.create().await.unwrap();

        assert!(!ws.delete_session().await.unwrap());

        ws.write_creds("{}").await.unwrap();
        assert!(ws.delete_session().await.unwrap());
        assert!(!ws.session_dir().exists());
        assert!(ws.exists());
    }

    #[tokio::test]
    async fn test_install_skipped_without_package_json() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = UserWorkspace::new(tmp.path(), 4);
        ws.create().await.unwrap();

        assert!(!ws.install_dependencies(PackageManager::Npm).await.unwrap());
    }
}
