//! Integration tests for workspace provisioning against a local git repository.

use std::path::Path;
use std::process::Command;

use clonebot_core::{CloneStatus, PremiumUsers, Settings, TokenStore, UserWorkspace};

fn git_available() -> bool {
    which::which("git").is_ok()
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git should run");
    assert!(status.success(), "git {:?} failed", args);
}

/// Create a one-commit repository to clone from.
fn make_origin(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    std::fs::write(dir.join("package.json"), r#"{"name":"app","scripts":{"start":"node index.js"}}"#).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

#[tokio::test]
async fn test_clone_then_update() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin");
    make_origin(&origin);

    let settings = Settings::with_data_dir(origin.to_string_lossy(), tmp.path().join("data"));
    settings.ensure_all_dirs().unwrap();

    let ws = UserWorkspace::new(&settings.users_dir(), 777);
    ws.create().await.unwrap();

    let first = ws.clone_repo(&settings.repo_link).await.unwrap();
    assert_eq!(first, CloneStatus::Cloned);
    assert!(ws.is_cloned());
    assert!(ws.root().join("package.json").is_file());

    // Running /addsession again must not fail on the non-empty folder.
    let second = ws.clone_repo(&settings.repo_link).await.unwrap();
    assert_eq!(second, CloneStatus::Updated);

    ws.create_session_dir().await.unwrap();
    ws.write_creds(r#"{"creds":true}"#).await.unwrap();
    assert!(ws.has_creds());
    assert!(ws.delete_session().await.unwrap());
    assert!(!ws.has_creds());
    assert!(ws.is_cloned());
}

#[tokio::test]
async fn test_clone_failure_is_reported() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let ws = UserWorkspace::new(tmp.path(), 1);
    ws.create().await.unwrap();

    let missing = tmp.path().join("no-such-repo");
    let err = ws.clone_repo(&missing.to_string_lossy()).await.unwrap_err();
    assert!(matches!(err, clonebot_core::CoreError::CommandFailed { .. }));
    assert!(!ws.is_cloned());
}

#[tokio::test]
async fn test_allow_lists_share_data_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = Settings::with_data_dir("repo", tmp.path());

    let premium = PremiumUsers::new(settings.premium_file());
    let tokens = TokenStore::new(settings.tokens_file());

    premium.grant(10).await.unwrap();
    let minted = tokens.generate(2).await.unwrap();

    // Files are plain JSON arrays.
    let prem_raw = std::fs::read_to_string(settings.premium_file()).unwrap();
    let prem: Vec<u64> = serde_json::from_str(&prem_raw).unwrap();
    assert_eq!(prem, vec![10]);

    let tokens_raw = std::fs::read_to_string(settings.tokens_file()).unwrap();
    let stored: Vec<String> = serde_json::from_str(&tokens_raw).unwrap();
    assert_eq!(stored, minted);

    // A reopened store sees the same data.
    let reopened = PremiumUsers::new(settings.premium_file());
    assert!(reopened.is_premium(10).await);
}
