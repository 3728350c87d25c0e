use assert_cmd::prelude::*;
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "RELAYS=ws://127.0.0.1:9\nSESSION_FILE={}\nQUERY_TIMEOUT_MS=500\nTHREAD_RETRIES=0\n",
        dir.path().join("session.json").display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

fn chanstr(env_path: &str, args: &[&str]) -> std::process::Output {
    Command::cargo_bin("chanstr")
        .unwrap()
        .env_remove("RELAYS")
        .env_remove("SESSION_FILE")
        .env_remove("LOGIN_SECRET_KEY")
        .arg("--env")
        .arg(env_path)
        .args(args)
        .output()
        .unwrap()
}

fn field(stdout: &[u8], name: &str) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{name}: ")).map(str::to_string))
        .unwrap_or_else(|| panic!("no {name} line"))
}

#[test]
fn boards_lists_registry() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = chanstr(&env_path, &["boards"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("/btc/ - Bitcoin"));
    assert!(stdout.contains("/b/ - Random [nsfw]"));
    assert_eq!(stdout.lines().filter(|l| l.starts_with('/')).count(), 12);
}

#[test]
fn ephemeral_identity_survives_between_runs() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    let first = chanstr(&env_path, &["identity", "show"]);
    assert!(first.status.success());
    let key = field(&first.stdout, "ephemeral");
    assert_eq!(key.len(), 64);
    assert_eq!(field(&first.stdout, "mode"), "anon");
    assert_eq!(field(&first.stdout, "active"), format!("{key} (anonymous)"));

    let second = chanstr(&env_path, &["identity", "show"]);
    assert_eq!(field(&second.stdout, "ephemeral"), key);

    let rotated = chanstr(&env_path, &["identity", "rotate"]);
    assert!(rotated.status.success());
    let fresh = field(&rotated.stdout, "ephemeral");
    assert_ne!(fresh, key);
    assert_eq!(field(&chanstr(&env_path, &["identity", "show"]).stdout, "ephemeral"), fresh);
}

#[test]
fn logged_in_mode_uses_configured_key() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let mut env = fs::read_to_string(&env_path).unwrap();
    env.push_str(&format!("LOGIN_SECRET_KEY={}\n", "01".repeat(32)));
    fs::write(&env_path, env).unwrap();

    let out = chanstr(&env_path, &["identity", "logged-in"]);
    assert!(out.status.success());
    assert_eq!(field(&out.stdout, "mode"), "logged-in");
    let active = field(&out.stdout, "active");
    assert_ne!(active, field(&out.stdout, "ephemeral"));
    assert!(!active.ends_with("(anonymous)"));

    let out = chanstr(&env_path, &["identity", "logout"]);
    assert_eq!(field(&out.stdout, "mode"), "anon");
    assert!(field(&out.stdout, "active").ends_with("(anonymous)"));
}

#[test]
fn post_without_image_is_refused() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = chanstr(&env_path, &["post", "b", "--subject", "hi", "--content", "text"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("missing prerequisite"));
}

#[test]
fn unknown_board_is_refused() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = chanstr(&env_path, &["board", "nope"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown board"));
}

#[test]
fn unreachable_relay_fails_board_read() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = chanstr(&env_path, &["board", "b"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error"));
}
