use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn vidtex(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vidtex"))
        .env_remove("VIDTEX_CONFIG")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run vidtex")
}

fn write_config(root: &Path, body: &str) -> String {
    let path = root.join("vidtex.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

fn report(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is a JSON report")
}

#[test]
fn simulate_presents_frames_and_releases_everything() {
    let output = vidtex(&["simulate", "--frames", "4"]);
    assert!(output.status.success());

    let report = report(&output);
    assert_eq!(report["mode"], "offscreen+onscreen");
    assert_eq!(report["frames_sent"], 4);
    assert_eq!(report["frames"]["presented"], 4);
    assert_eq!(report["frames"]["onscreen_passes"], 4);
    assert_eq!(report["swaps"], 4);
    assert_eq!(report["dropped_events"], 0);
    assert_eq!(report["leaked_gl_objects"], 0);
    assert_eq!(report["leaked_driver_objects"], 0);
    assert_eq!(report["foreign_thread_calls"], 0);
    assert_eq!(report["failure"], Value::Null);
}

#[test]
fn shared_context_skips_onscreen_pass() {
    let output = vidtex(&["simulate", "--shared"]);
    assert!(output.status.success());

    let report = report(&output);
    assert_eq!(report["mode"], "offscreen-only");
    assert_eq!(report["frames"]["offscreen_passes"], 3);
    assert_eq!(report["frames"]["onscreen_passes"], 0);
    assert_eq!(report["draws"], 3);
}

#[test]
fn resizes_apply_in_order() {
    let output = vidtex(&[
        "simulate", "--frames", "1", "--resize", "320x240", "--resize", "1920x1080",
    ]);
    assert!(output.status.success());

    let report = report(&output);
    assert_eq!(report["frames"]["presented"], 3);
    assert_eq!(report["dimensions"]["width"], 1920);
    assert_eq!(report["dimensions"]["height"], 1080);
    let events: Vec<&str> = report["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .filter(|event| event.starts_with("resized"))
        .collect();
    assert_eq!(events, vec!["resized 320x240", "resized 1920x1080"]);
}

#[test]
fn power_of_two_config_rounds_storage() {
    let root = TempDir::new().unwrap();
    let config = write_config(
        root.path(),
        "version = 1\n[render]\ndimension_policy = \"power-of-two\"\n",
    );

    let output = vidtex(&["simulate", "--config", &config, "--resize", "1920x1080"]);
    assert!(output.status.success());

    let report = report(&output);
    assert_eq!(report["storage"]["width"], 2048);
    assert_eq!(report["storage"]["height"], 2048);
}

#[test]
fn swap_failure_exits_with_error_and_no_leaks() {
    let output = vidtex(&["simulate", "--frames", "3", "--fail-after-swaps", "1"]);
    assert!(!output.status.success());

    let report = report(&output);
    assert!(report["failure"].is_string());
    assert_eq!(report["swaps"], 1);
    assert_eq!(report["leaked_gl_objects"], 0);
    assert_eq!(report["leaked_driver_objects"], 0);
    assert!(String::from_utf8_lossy(&output.stderr).contains("render subsystem failed"));
}

#[test]
fn config_check_accepts_valid_and_rejects_invalid_files() {
    let root = TempDir::new().unwrap();
    let valid = write_config(
        root.path(),
        "version = 1\n[render]\nwidth = 1280\nheight = 720\nsync_timeout = \"2s\"\n",
    );
    let output = vidtex(&["config", "check", &valid]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("initial size: 1280x720"));

    let invalid = write_config(root.path(), "version = 1\n[render]\nwidth = 0\n");
    let output = vidtex(&["config", "check", &invalid]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("render.width"));
}

#[test]
fn config_show_prints_effective_toml() {
    let root = TempDir::new().unwrap();
    let config = write_config(
        root.path(),
        "version = 1\n[render]\ndimension_policy = \"power-of-two\"\n",
    );

    let output = vidtex(&["config", "show", "--config", &config]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dimension_policy = \"power-of-two\""));
    assert!(stdout.contains("thread_name = \"video-render\""));
}
