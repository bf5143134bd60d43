//! Integration tests for the `presenza` binary.
//!
//! Argument parsing, config management, and one-shot device queries
//! against wiremock-backed fake devices.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// `presenza` with env isolation: no `PRESENZA_*` overrides and home
/// directories inside `home`.
fn presenza_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("presenza");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("PRESENZA_CONFIG")
        .env_remove("PRESENZA_OUTPUT");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Write a config with one channel per `(id, port)` pair.
fn write_config(dir: &TempDir, channels: &[(&str, u16)]) -> std::path::PathBuf {
    let mut text = format!(
        "state_file = \"{}\"\n\n[polling]\nrequest_timeout_ms = 2000\n",
        dir.path().join("state.json").display()
    );
    for (id, port) in channels {
        text.push_str(&format!(
            "\n[[channels]]\nid = \"{id}\"\nhost = \"127.0.0.1\"\nport = {port}\n\
             channel = 1\nusername = \"admin\"\npassword = \"s3cret\"\n"
        ));
    }
    let path = dir.path().join("presenza.toml");
    std::fs::write(&path, text).unwrap();
    path
}

struct NoAuth;

impl Match for NoAuth {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("authorization")
    }
}

async fn fake_device(inside: u32) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(NoAuth)
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            r#"Digest realm="Login to NVR", qop="auth", nonce="abc123""#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/videoStatServer.cgi"))
        .and(query_param("action", "getSummary"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("summary.InsideSubtotal.Total={inside}\r\n")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/magicBox.cgi"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("deviceType=NVR5216\r\nserialNumber=ABC\r\n"),
        )
        .mount(&server)
        .await;
    server
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = presenza_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    presenza_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("serve")
                .and(predicate::str::contains("presence"))
                .and(predicate::str::contains("probe"))
                .and(predicate::str::contains("config")),
        );
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    presenza_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("presenza"));
}

#[test]
fn test_completions_zsh() {
    let home = TempDir::new().unwrap();
    presenza_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_invalid_output_format() {
    let home = TempDir::new().unwrap();
    let output = presenza_cmd(home.path())
        .args(["--output", "xml", "presence"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Config management ───────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("custom.toml");
    presenza_cmd(home.path())
        .args(["config", "path", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("nested").join("presenza.toml");

    presenza_cmd(home.path())
        .args(["config", "init", "--config"])
        .arg(&file)
        .assert()
        .success();
    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("[[channels]]"));

    presenza_cmd(home.path())
        .args(["config", "init", "--config"])
        .arg(&file)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    presenza_cmd(home.path())
        .args(["config", "init", "--force", "--config"])
        .arg(&file)
        .assert()
        .success();
}

#[test]
fn test_config_show_masks_passwords() {
    let home = TempDir::new().unwrap();
    let file = write_config(&home, &[("d4", 8080)]);
    presenza_cmd(home.path())
        .args(["config", "show", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("****").and(predicate::str::contains("s3cret").not()));
}

// ── Device queries ──────────────────────────────────────────────────

#[test]
fn test_presence_without_channels_is_zero() {
    let home = TempDir::new().unwrap();
    let file = write_config(&home, &[]);
    presenza_cmd(home.path())
        .args(["presence", "--output", "plain", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout("0\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_presence_sums_devices() {
    let a = fake_device(3).await;
    let b = fake_device(4).await;
    let home = TempDir::new().unwrap();
    let file = write_config(
        &home,
        &[("a", a.address().port()), ("b", b.address().port())],
    );

    let output = presenza_cmd(home.path())
        .args(["presence", "--output", "json", "--config"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["presenti_totali"], 7);
    assert_eq!(body["per_camera"]["a"]["count"], 3);
    assert_eq!(body["per_camera"]["b"]["status"], "ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_reports_count_and_system_info() {
    let device = fake_device(9).await;
    let home = TempDir::new().unwrap();
    let file = write_config(&home, &[("d4", device.address().port())]);

    presenza_cmd(home.path())
        .args(["probe", "d4", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Count:     9")
                .and(predicate::str::contains("deviceType=NVR5216")),
        );
}

#[test]
fn test_probe_unknown_channel_is_not_found() {
    let home = TempDir::new().unwrap();
    let file = write_config(&home, &[("d4", 8080)]);
    presenza_cmd(home.path())
        .args(["probe", "d9", "--config"])
        .arg(&file)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("d9"));
}

#[test]
fn test_probe_unreachable_device_is_connection_error() {
    let home = TempDir::new().unwrap();
    let file = write_config(&home, &[("d4", 1)]);
    presenza_cmd(home.path())
        .args(["probe", "d4", "--count-only", "--config"])
        .arg(&file)
        .assert()
        .code(7);
}
