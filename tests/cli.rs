//! Tests that drive the `mem` binary.
//!
//! Every test here stays offline: the configured provider is Ollama, which
//! only opens a connection when something is embedded, so `sync` and
//! non-empty searches are covered by `tests/memory_index.rs` instead. `get`
//! never resolves a provider, so it is also checked against an OpenAI
//! config with no API key.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mem_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mem");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    fs::write(
        root.join("MEMORY.md"),
        "# Memory\n\nPrefers Rust for CLI tools.\nDeploys run on Fridays.\n",
    )
    .unwrap();
    fs::create_dir_all(root.join("memory")).unwrap();
    fs::write(
        root.join("memory/2024-05-01.md"),
        "# 2024-05-01\n\nMigrated the cache to SQLite.\n",
    )
    .unwrap();
    fs::write(root.join("notes.md"), "not a memory file\n").unwrap();

    let config_content = format!(
        r#"[workspace]
root = "{root}"

[db]
path = "{root}/data/memory.sqlite"

[chunking]
tokens = 400
overlap = 80

[retrieval]
max_results = 6
min_score = 0.35

[embedding]
provider = "ollama"
url = "http://127.0.0.1:9"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mem.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mem(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mem_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mem binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mem(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/memory.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mem(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mem(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_status_json_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mem(&config_path, &["status", "--json"]);
    assert!(success, "status failed: stderr={}", stderr);

    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["files"], 0);
    assert_eq!(status["chunks"], 0);
    assert_eq!(status["provider"], "ollama");
    assert_eq!(status["requested_provider"], "ollama");
    assert_eq!(status["chunk_tokens"], 400);
}

#[test]
fn test_status_human() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_mem(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Memory Harness Status"));
    assert!(stdout.contains("ollama"));
}

#[test]
fn test_empty_query_prints_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_mem(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (stdout, _, success) = run_mem(&config_path, &["search", "", "--json"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_get_whole_file() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mem(&config_path, &["get", "memory/2024-05-01.md"]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("Migrated the cache to SQLite."));
}

#[test]
fn test_get_line_window() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_mem(
        &config_path,
        &["get", "MEMORY.md", "--from", "3", "--lines", "2"],
    );
    assert!(success);
    assert_eq!(stdout, "Prefers Rust for CLI tools.\nDeploys run on Fridays.\n");
}

#[test]
fn test_get_rejects_escaping_path() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_mem(&config_path, &["get", "../outside.md"]);
    assert!(!success);
    assert!(stderr.contains("escapes the workspace"), "stderr={}", stderr);
}

#[test]
fn test_get_needs_neither_provider_nor_database() {
    let (tmp, _) = setup_test_env();
    let db_path = tmp.path().join("fresh/memory.sqlite");
    let config_path = tmp.path().join("config/openai.toml");
    fs::write(
        &config_path,
        format!(
            concat!(
                "[workspace]\nroot = \"{}\"\n\n",
                "[db]\npath = \"{}\"\n\n",
                "[embedding]\nprovider = \"openai\"\n",
            ),
            tmp.path().display(),
            db_path.display()
        ),
    )
    .unwrap();

    let output = Command::new(mem_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["get", "../outside.md"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("escapes the workspace"), "stderr={}", stderr);
    assert!(!db_path.exists());
    assert!(!tmp.path().join("fresh").exists());

    let output = Command::new(mem_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["get", "MEMORY.md"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Prefers Rust"));
    assert!(!db_path.exists());
}

#[test]
fn test_get_rejects_non_memory_file() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_mem(&config_path, &["get", "notes.md"]);
    assert!(!success);
    assert!(stderr.contains("not a memory file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad_config = tmp.path().join("config/bad.toml");
    fs::write(&bad_config, "[embedding]\nprovider = \"carrier-pigeon\"\n").unwrap();

    let (_, stderr, success) = run_mem(&bad_config, &["status"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"), "stderr={}", stderr);
}
