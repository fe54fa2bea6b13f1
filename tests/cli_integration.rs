//! Integration tests for the ralph-ollama CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a Command for the ralph-ollama binary
fn ralph() -> Command {
    Command::new(cargo::cargo_bin!("ralph-ollama"))
}

#[test]
fn test_help() {
    ralph()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("local Ollama model"));
}

#[test]
fn test_version() {
    ralph()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_init_creates_structure() {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("demo");

    ralph()
        .arg("--project")
        .arg(&project)
        .args(["init", "Demo", "--description", "A greeting CLI"])
        .args(["--task", "Create hello.py that prints Hello, World!"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));

    assert!(project.join("README.md").exists());
    assert!(project.join("@fix_plan.md").exists());
    for dir in ["src", "tests", "docs", "specs"] {
        assert!(project.join(dir).is_dir());
    }
}

#[test]
fn test_tasks_and_add() {
    let temp = TempDir::new().unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["init", "Demo", "-d", "demo", "-t", "First task here"])
        .assert()
        .success();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["add", "Second task here"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added 1 task"));

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["tasks", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("First task here"))
        .stdout(predicate::str::contains("Second task here"));
}

#[test]
fn test_tasks_empty_project() {
    let temp = TempDir::new().unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .arg("tasks")
        .assert()
        .success()
        .stdout(predicate::str::contains("No incomplete tasks"));
}

#[test]
fn test_extract_json() {
    let temp = TempDir::new().unwrap();
    let response = temp.path().join("response.md");
    fs::write(
        &response,
        "Here you go:\n\n```src/main.py\nprint('hi')\n```\n\n```python\nx = 1\n```\n",
    )
    .unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .arg("extract")
        .arg(&response)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("src/main.py"))
        .stdout(predicate::str::contains("generated_1.py"));
}

#[test]
fn test_config_show_defaults() {
    let temp = TempDir::new().unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_retries\": 2"))
        .stdout(predicate::str::contains("llama3.2"));
}

#[test]
fn test_config_validate_rejects_bad_value() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".ralph")).unwrap();
    fs::write(
        temp.path().join(".ralph/settings.json"),
        r#"{"generation": {"timeout_secs": 0}}"#,
    )
    .unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout_secs"));
}

#[test]
fn test_missing_project_dir() {
    ralph()
        .args(["--project", "/definitely/not/here", "tasks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_invalid_mode_rejected() {
    let temp = TempDir::new().unwrap();

    ralph()
        .arg("--project")
        .arg(temp.path())
        .args(["run", "--mode", "sideways"])
        .assert()
        .failure();
}
