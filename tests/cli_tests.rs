//! Tests that drive the `codewindow` binary end to end

use anyhow::Result;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary from `cwd` with a private HOME so user settings never leak in
fn run(cwd: &Path, home: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_codewindow"));
    command
        .args(args)
        .current_dir(cwd)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .env_remove("CODEWINDOW_CONFIG_PATH")
        .env_remove("CODEWINDOW_CURSOR_KEY");
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().expect("failed to run codewindow")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn setup_project() -> Result<(TempDir, TempDir)> {
    let project = TempDir::new()?;
    let home = TempDir::new()?;
    fs::create_dir(project.path().join("src"))?;
    for i in 0..6 {
        fs::write(
            project.path().join("src").join(format!("mod_{i}.py")),
            format!("def handler_{i}(event):\n    return event\n"),
        )?;
    }
    Ok((project, home))
}

#[test]
fn test_config_command_reflects_file_hierarchy_and_env() -> Result<()> {
    let (project, home) = setup_project()?;
    fs::create_dir(home.path().join(".codewindow"))?;
    fs::write(
        home.path().join(".codewindow/settings.json"),
        r#"{ "log_level": "debug", "analyzer": { "max_concurrent_files": 2 } }"#,
    )?;
    fs::create_dir(project.path().join(".codewindow"))?;
    fs::write(
        project.path().join(".codewindow/settings.json"),
        r#"{ "analyzer": { "max_concurrent_files": 4 }, "tokens": { "model": "claude" } }"#,
    )?;

    let output = run(
        project.path(),
        home.path(),
        &["config"],
        &[("CODEWINDOW_WORKERS", "7")],
    );
    assert!(output.status.success());

    let config: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(config["log_level"], "debug");
    assert_eq!(config["analyzer"]["max_concurrent_files"], 4);
    assert_eq!(config["tokens"]["model"], "claude");
    assert_eq!(config["tasks"]["workers"], 7);
    Ok(())
}

#[test]
fn test_invalid_config_falls_back_to_defaults() -> Result<()> {
    let (project, home) = setup_project()?;
    fs::create_dir(project.path().join(".codewindow"))?;
    fs::write(
        project.path().join(".codewindow/settings.json"),
        r#"{ "analyzer": { "max_concurrent_files": 0 } }"#,
    )?;

    let output = run(project.path(), home.path(), &["config"], &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid configuration"));

    let config: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(config["analyzer"]["max_concurrent_files"], 8);
    Ok(())
}

#[test]
fn test_paginate_resumes_across_invocations() -> Result<()> {
    let (project, home) = setup_project()?;
    let key = [("CODEWINDOW_CURSOR_KEY", "integration-secret")];
    let base = ["paginate", ".", "--page-size", "4", "--format", "json"];

    let first = run(project.path(), home.path(), &base, &key);
    assert!(first.status.success());
    let first: Value = serde_json::from_str(&stdout(&first))?;
    assert_eq!(first["info"]["current_page"], 1);
    assert_eq!(first["info"]["total_pages"], 2);
    assert_eq!(first["content"].as_array().map(Vec::len), Some(4));
    let cursor = first["cursor"].as_str().expect("first page has a cursor");

    let mut args = base.to_vec();
    args.extend(["--cursor", cursor]);
    let second = run(project.path(), home.path(), &args, &key);
    assert!(second.status.success());
    let second: Value = serde_json::from_str(&stdout(&second))?;
    assert_eq!(second["info"]["current_page"], 2);
    assert_eq!(second["content"].as_array().map(Vec::len), Some(2));
    assert!(second["cursor"].is_null());
    Ok(())
}

#[test]
fn test_chunk_command_lists_chunks() -> Result<()> {
    let (project, home) = setup_project()?;
    let output = run(
        project.path(),
        home.path(),
        &["chunk", "src/mod_0.py", "--strategy", "lines"],
        &[("NO_COLOR", "1")],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Chunks: 1"));
    assert!(text.contains("lines 1-2"));
    Ok(())
}

#[test]
fn test_analyze_command_reports_every_file() -> Result<()> {
    let (project, home) = setup_project()?;
    let output = run(
        project.path(),
        home.path(),
        &["analyze", ".", "--max-concurrent", "2", "--format", "json"],
        &[],
    );
    assert!(output.status.success());

    let batch: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(batch["total_files"], 6);
    assert_eq!(batch["successful"], 6);
    let first = &batch["results"][0]["data"]["file_analysis"];
    assert_eq!(first["functions"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn test_unknown_chunk_strategy_is_rejected() -> Result<()> {
    let (project, home) = setup_project()?;
    let output = run(
        project.path(),
        home.path(),
        &["chunk", "src/mod_0.py", "--strategy", "paragraphs"],
        &[],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("paragraphs"));
    assert!(stdout(&output).is_empty());
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() -> Result<()> {
    let (project, home) = setup_project()?;
    let output = run(project.path(), home.path(), &["chunk", "nope.rs"], &[]);
    assert!(!output.status.success());
    Ok(())
}
