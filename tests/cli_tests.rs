// tests/cli_tests.rs

use assert_cmd::Command;
use chat_relay::config::load_config;
use predicates::prelude::*;
use secrecy::ExposeSecret;
use serial_test::serial;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const VALID_CONFIG: &str = r#"
provider_priority: [groq, openai]
models:
  groq: llama3-70b-8192
  openai: gpt-4o-mini
api_keys:
  groq: [gsk-1]
  openai: [sk-1, sk-2]
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, content).unwrap();
    path
}

fn relay(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("chat-relay").unwrap();
    cmd.arg("--config").arg(config).env("RUST_LOG", "error");
    cmd
}

#[test]
fn validate_accepts_a_complete_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID_CONFIG);

    relay(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("groq, openai"))
        .stdout(predicate::str::contains("keys:      3"));
}

#[test]
fn validate_rejects_a_provider_without_keys() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "provider_priority: [openai]\nmodels:\n  openai: gpt-4o-mini\n",
    );

    relay(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires at least one API key"));
}

#[test]
fn validate_rejects_duplicate_providers() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "provider_priority: [openai, openai]\napi_keys:\n  openai: [sk-1]\n",
    );

    relay(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate provider"));
}

#[test]
fn keys_prints_fresh_state_and_persists_it() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let config = write_config(
        &dir,
        &format!("{VALID_CONFIG}storage:\n  state_path: {}\n", state_path.display()),
    );

    relay(&config)
        .arg("keys")
        .assert()
        .success()
        .stdout(predicate::str::contains("Priority: groq > openai"))
        .stdout(predicate::str::contains("active"));
    assert!(state_path.exists());
}

#[test]
#[serial]
fn environment_keys_override_file_keys() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID_CONFIG);

    std::env::set_var("CHAT_RELAY_API_KEYS_GROQ", "gsk-env-1, gsk-env-2");
    let loaded = load_config(&config);
    std::env::remove_var("CHAT_RELAY_API_KEYS_GROQ");

    let loaded = loaded.unwrap();
    let keys: Vec<&str> = loaded
        .keys_for("groq")
        .iter()
        .map(|k| k.expose_secret().as_str())
        .collect();
    assert_eq!(keys, ["gsk-env-1", "gsk-env-2"]);
    assert_eq!(loaded.keys_for("openai").len(), 2);
}

#[test]
#[serial]
fn environment_overrides_state_path() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID_CONFIG);

    std::env::set_var("CHAT_RELAY_STATE_PATH", "/tmp/relay-state.json");
    let loaded = load_config(&config);
    std::env::remove_var("CHAT_RELAY_STATE_PATH");

    assert_eq!(
        loaded.unwrap().storage.state_path,
        Path::new("/tmp/relay-state.json")
    );
}
