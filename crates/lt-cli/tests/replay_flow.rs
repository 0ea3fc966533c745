//! End-to-end tests running the `lt` binary against recorded snapshot logs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn lt_binary() -> String {
    env!("CARGO_BIN_EXE_lt").to_string()
}

const LOG: &str = r#"{"source":"plex","platform":"den","timestamp":"2025-03-01T20:00:00Z","status":"playing","play":{"track":{"title":"Aquarius","artist":"Boards of Canada"},"duration":200},"position":180}
{"source":"plex","platform":"den","timestamp":"2025-03-01T20:00:10Z","status":"playing","play":{"track":{"title":"Aquarius","artist":"Boards of Canada"},"duration":200},"position":190}
{"source":"plex","platform":"den","timestamp":"2025-03-01T20:00:15Z","status":"playing","play":{"track":{"title":"Aquarius","artist":"Boards of Canada"},"duration":200},"position":5}
{"source":"lastfm","platform":"alice","timestamp":"2025-03-01T20:00:00Z","play":{"track":{"title":"Dayvan Cowboy","artist":"Boards of Canada"},"duration":180}}
{"source":"fip","platform":"kitchen","timestamp":"2025-03-01T20:00:00Z","status":"playing","play":{"track":{"title":"FIP"}}}
{"source":"fip","platform":"kitchen","timestamp":"2025-03-01T20:00:10Z","status":"playing","play":{"track":{"title":"FIP"}}}
{"source":"fip","platform":"kitchen","timestamp":"2025-03-01T20:00:20Z","status":"playing","play":{"track":{"title":"FIP"}}}
"#;

const CONFIG: &str = r#"
[sources.lastfm]
kind = "now_playing"

[sources.fip]
kind = "radio"
"#;

/// Writes the log and config into a fresh home directory.
fn setup() -> (TempDir, PathBuf, PathBuf) {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("snapshots.jsonl");
    std::fs::write(&log, LOG).unwrap();
    let config = temp.path().join("lt.toml");
    std::fs::write(&config, CONFIG).unwrap();
    (temp, log, config)
}

fn lt(home: &Path, args: &[&str]) -> Output {
    Command::new(lt_binary())
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run lt")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

#[test]
fn test_replay_reports_repeat_and_orphan() {
    let (temp, log, config) = setup();

    let output = lt(
        temp.path(),
        &[
            "replay",
            log.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--json",
            "--until",
            "2025-03-01T20:01:40Z",
        ],
    );
    assert!(
        output.status.success(),
        "lt replay should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let completions = json_lines(&output);
    let summary: Vec<_> = completions
        .iter()
        .map(|c| {
            (
                c["source"].as_str().unwrap().to_string(),
                c["endReason"].as_str().unwrap().to_string(),
            )
        })
        .collect();

    assert!(summary.contains(&("plex".to_string(), "repeat".to_string())));
    assert!(summary.contains(&("lastfm".to_string(), "orphaned".to_string())));
    assert!(
        !summary.iter().any(|(source, _)| source == "fip"),
        "radio sessions stay open: {summary:?}"
    );

    let repeat = completions
        .iter()
        .find(|c| c["endReason"] == "repeat")
        .unwrap();
    assert_eq!(repeat["platform"], "den");
    assert_eq!(repeat["listenedSeconds"], 10.0);
    assert_eq!(repeat["scrobble"], false);
}

#[test]
fn test_replay_reads_stdin() {
    let (temp, _log, _config) = setup();

    let mut child = Command::new(lt_binary())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .args(["replay", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(LOG.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("plex/den"),
        "human output should list the repeat: {stdout}"
    );
    assert!(stdout.contains("repeat"));
}

#[test]
fn test_status_json_lists_players() {
    let (temp, log, config) = setup();

    let output = lt(
        temp.path(),
        &[
            "status",
            log.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "lt status should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let states: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    let players: Vec<_> = states
        .iter()
        .map(|s| {
            format!(
                "{}/{}",
                s["source"].as_str().unwrap(),
                s["platform"].as_str().unwrap()
            )
        })
        .collect();
    assert_eq!(players, vec!["fip/kitchen", "lastfm/alice", "plex/den"]);

    let radio = &states[0];
    assert_eq!(radio["policy"], "radio");
    assert_eq!(radio["sessionState"], "active");
    assert_eq!(radio["listenedSeconds"], 20.0);
}

#[test]
fn test_policies_uses_config_file() {
    let (temp, _log, config) = setup();

    let output = lt(temp.path(), &["policies", "-c", config.to_str().unwrap()]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("now_playing"));
    assert!(stdout.contains("radio"));
}

#[test]
fn test_env_overrides_config() {
    let (temp, _log, _config) = setup();

    let output = Command::new(lt_binary())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env("LT_DEFAULT_KIND", "radio")
        .arg("policies")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let default_row = stdout
        .lines()
        .find(|line| line.starts_with("(default)"))
        .unwrap();
    assert!(default_row.contains("radio"), "got: {default_row}");
}

#[test]
fn test_malformed_snapshot_reports_line() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("broken.jsonl");
    std::fs::write(
        &log,
        "{\"platform\":\"den\",\"timestamp\":\"2025-03-01T20:00:00Z\"}\n{\"platform\":\"\"}\n",
    )
    .unwrap();

    let output = lt(temp.path(), &["replay", log.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2"), "stderr: {stderr}");
}

#[test]
fn test_missing_input_fails() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.jsonl");

    let output = lt(temp.path(), &["replay", missing.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to open"));
}
