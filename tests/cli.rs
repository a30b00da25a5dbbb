use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn relay(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kai-relay").unwrap();
    cmd.arg("--config")
        .arg(config_dir.path().join("config.toml"))
        .arg("--log-level")
        .arg("warn");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("kai-relay")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("providers"));
}

#[test]
fn test_config_is_created_with_defaults() {
    let dir = TempDir::new().unwrap();

    relay(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_response_segments = 2"))
        .stdout(predicate::str::contains("summary_ttl_secs = 600"))
        .stdout(predicate::str::contains("summary_batch_size = 50"));

    assert!(dir.path().join("config.toml").exists());
}

#[test]
fn test_config_file_values_are_used() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "default_provider = \"openai\"\n\n[pipeline]\nmax_response_segments = 4\n",
    )
    .unwrap();

    relay(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("default_provider = \"openai\""))
        .stdout(predicate::str::contains("max_response_segments = 4"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[pipeline]\nmax_response_segments = 0\n",
    )
    .unwrap();

    relay(&dir)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_response_segments"));
}

#[test]
fn test_providers_are_listed() {
    let dir = TempDir::new().unwrap();

    relay(&dir)
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("openrouter"))
        .stdout(predicate::str::contains("https://api.openai.com/v1"));
}
