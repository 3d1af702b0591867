//! Integration tests for the premium / token flow through the bot state.

use clonebot_core::Settings;
use clonebot_telegram::{create_shared_state, Command, LaunchReport, RedeemOutcome};
use teloxide::utils::command::BotCommands;

fn settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::with_data_dir("https://example.com/app.git", dir);
    settings.owner_ids = vec![1000];
    settings
}

#[tokio::test]
async fn test_owner_mints_token_user_redeems() {
    let tmp = tempfile::tempdir().unwrap();
    let state = create_shared_state(settings(tmp.path()));

    assert!(state.is_owner(1000));
    let tokens = state.generate_tokens(1).await.unwrap();

    assert!(!state.is_premium(42).await);
    let outcome = state.redeem(42, &tokens[0].to_lowercase()).await.unwrap();
    assert_eq!(outcome, RedeemOutcome::Redeemed);
    assert!(state.is_premium(42).await);
    assert!(state.list_tokens().await.is_empty());
}

#[tokio::test]
async fn test_premium_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let state = create_shared_state(settings(tmp.path()));
        state.grant_premium(5).await.unwrap();
        state.expect_creds(5).await;
    }

    // Allow-lists persist; the awaiting flag does not.
    let state = create_shared_state(settings(tmp.path()));
    assert!(state.is_premium(5).await);
    assert!(!state.is_awaiting(5).await);
}

#[tokio::test]
async fn test_addsession_creds_roundtrip_state() {
    let tmp = tempfile::tempdir().unwrap();
    let state = create_shared_state(settings(tmp.path()));

    let ws = state.workspace(8);
    ws.create().await.unwrap();
    ws.create_session_dir().await.unwrap();
    state.expect_creds(8).await;

    assert!(state.store_creds(8, "nope").await.is_err());
    assert!(state.is_awaiting(8).await);

    state.store_creds(8, r#"{"ok":1}"#).await.unwrap();
    assert!(!state.is_awaiting(8).await);

    let status = state.workspace_status(8).await;
    assert!(status.has_creds);
    assert!(!status.cloned);
    assert_eq!(status.running_pid, None);
}

#[tokio::test]
async fn test_session_flow_creds_connect_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = settings(tmp.path());
    settings.start_command = Some(vec!["sh".into(), "-c".into(), "cat session/creds.json; sleep 30".into()]);
    settings.start_grace = std::time::Duration::from_millis(300);
    let state = create_shared_state(settings);

    let ws = state.workspace(21);
    ws.create().await.unwrap();
    state.expect_creds(21).await;
    state.store_creds(21, r#"{"me":"21"}"#).await.unwrap();

    // Creds in hand, the app starts and reads them.
    let LaunchReport::Running(Some(pid)) = state.launch_instance(21).await.unwrap() else {
        panic!("expected a running instance");
    };
    assert_eq!(state.running_pid(21).await, Some(pid));
    assert!(std::fs::read_to_string(ws.log_file()).unwrap().contains(r#"{"me":"21"}"#));

    // What /delsession does: stop first, then drop the session folder.
    assert!(state.stop_instance(21).await.unwrap());
    assert!(ws.delete_session().await.unwrap());
    assert_eq!(state.running_pid(21).await, None);
    assert!(!state.workspace_status(21).await.has_creds);
    assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
}

#[test]
fn test_command_menu() {
    let commands = Command::bot_commands();
    let names: Vec<_> = commands
        .iter()
        .map(|c| c.command.trim_start_matches('/'))
        .collect();
    for expected in ["start", "status", "connect", "addsession", "delsession", "redeem", "ping", "uptime"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
}
