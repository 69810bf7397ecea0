use std::fs;
use std::process::Command;

use tempfile::TempDir;

#[test]
fn version_flag_exits_cleanly() {
    let output = Command::new(env!("CARGO_BIN_EXE_fraglive"))
        .arg("--version")
        .output()
        .expect("run fraglive");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("fraglive"), "stdout: {stdout}");
}

#[test]
fn missing_config_file_fails_before_opening_a_window() {
    let root = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_fraglive"))
        .arg("--config")
        .arg(root.path().join("absent.toml"))
        .output()
        .expect("run fraglive");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.toml"), "stderr: {stderr}");
}

#[test]
fn non_positive_rate_in_config_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("preview.toml");
    fs::write(&config, "bpm = -30\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_fraglive"))
        .arg("--config")
        .arg(&config)
        .env("RUST_LOG", "off")
        .output()
        .expect("run fraglive");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bpm"), "stderr: {stderr}");
}
