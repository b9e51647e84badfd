//! Smoke tests for the `weft` binary.
//!
//! Everything runs against temp directories: a file-backed asset root and an
//! embedded datastore under `WEFT_DATABASE_DIR`. No network is touched.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn weft(tmp: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_weft"));
    cmd.env("WEFT_DATABASE_DIR", tmp.join("db"))
        .env_remove("WEFT_LOG");
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Writes a config pointing the asset root at `tmp/assets`.
fn write_config(tmp: &Path) -> std::path::PathBuf {
    let assets = tmp.join("assets");
    std::fs::create_dir_all(&assets).unwrap();
    let config = tmp.join("weft.toml");
    std::fs::write(
        &config,
        format!("asset_root = \"{}\"\nresolve_timeout_ms = 5000\n", assets.display()),
    )
    .unwrap();
    config
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let tmp = TempDir::new().unwrap();
    let output = weft(tmp.path()).arg("--help").output().expect("failed to execute weft");
    assert!(output.status.success(), "weft --help should exit 0");
    let stdout = stdout(&output);
    assert!(stdout.contains("load"), "help output should list load subcommand");
    assert!(stdout.contains("materialize"), "help output should list materialize subcommand");
    assert!(stdout.contains("store"), "help output should list store subcommand");
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let output = weft(tmp.path())
        .arg("nonexistent-subcommand")
        .output()
        .expect("failed to execute weft");
    assert!(!output.status.success(), "unknown subcommand should exit non-zero");
}

// ── Load ─────────────────────────────────────────────────────────────────────

#[test]
fn load_prints_each_resource() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    std::fs::write(tmp.path().join("assets/site.css"), ".site{}").unwrap();
    std::fs::write(tmp.path().join("assets/menu.json"), r#"{"items": 3}"#).unwrap();

    let output = weft(tmp.path())
        .arg("--config")
        .arg(&config)
        .args(["load", "site.css", "menu.json"])
        .output()
        .expect("failed to execute weft load");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let lines: Vec<serde_json::Value> = stdout(&output)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "stylesheet");
    assert_eq!(lines[0]["value"], ".site{}");
    assert_eq!(lines[1]["value"]["items"], 3);
}

#[test]
fn load_of_missing_file_fails_cleanly() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let output = weft(tmp.path())
        .arg("--config")
        .arg(&config)
        .args(["load", "nope.css"])
        .output()
        .expect("failed to execute weft load");

    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("nope.css"),
        "error should name the key: {}",
        stderr(&output)
    );
}

// ── Materialize ──────────────────────────────────────────────────────────────

#[test]
fn materialize_registers_manifest_and_resolves_data() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    std::fs::write(tmp.path().join("assets/card.css"), ".card{}").unwrap();
    let manifest = tmp.path().join("card.json");
    std::fs::write(&manifest, r#"{"name": "card", "defaults": {"title": "untitled"}}"#).unwrap();
    let data = tmp.path().join("data.json");
    std::fs::write(&data, r#"{"style": ["@load", "card.css"], "title": "Hello"}"#).unwrap();

    let output = weft(tmp.path())
        .arg("--config")
        .arg(&config)
        .args(["materialize", "card", "--manifest"])
        .arg(&manifest)
        .arg("--data")
        .arg(&data)
        .output()
        .expect("failed to execute weft materialize");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let result: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(result["index"], "card-1");
    assert_eq!(result["rendered"], "card-1");
    assert_eq!(result["fields"]["title"], "Hello");
    assert_eq!(result["fields"]["style"], ".card{}");
}

#[test]
fn materialize_unknown_component_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let output = weft(tmp.path())
        .arg("--config")
        .arg(&config)
        .args(["materialize", "ghost"])
        .output()
        .expect("failed to execute weft materialize");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("ghost"), "stderr: {}", stderr(&output));
}

// ── Store ────────────────────────────────────────────────────────────────────

#[test]
fn embedded_store_persists_across_invocations() {
    let tmp = TempDir::new().unwrap();
    let settings = tmp.path().join("notes.json");
    std::fs::write(&settings, r#"{"table": "notes"}"#).unwrap();

    let run = |args: &[&str]| {
        weft(tmp.path())
            .arg("store")
            .arg("--settings")
            .arg(&settings)
            .args(args)
            .output()
            .expect("failed to execute weft store")
    };

    let set = run(&["set", r#"{"key": "n1", "text": "hello"}"#]);
    assert!(set.status.success(), "stderr: {}", stderr(&set));

    let count = run(&["count"]);
    assert_eq!(stdout(&count).trim(), "1");

    let get = run(&["get", "n1"]);
    let dataset: serde_json::Value = serde_json::from_str(stdout(&get).trim()).unwrap();
    assert_eq!(dataset["text"], "hello");

    let delete = run(&["delete", "n1"]);
    assert!(delete.status.success(), "stderr: {}", stderr(&delete));
    assert_eq!(stdout(&run(&["get", "n1"])).trim(), "null");
    assert_eq!(stdout(&run(&["count"])).trim(), "0");
}

#[test]
fn store_rejects_non_object_dataset() {
    let tmp = TempDir::new().unwrap();
    let settings = tmp.path().join("notes.json");
    std::fs::write(&settings, r#"{"table": "notes"}"#).unwrap();

    let output = weft(tmp.path())
        .arg("store")
        .arg("--settings")
        .arg(&settings)
        .args(["set", "[1, 2]"])
        .output()
        .expect("failed to execute weft store set");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("JSON object"), "stderr: {}", stderr(&output));
}
