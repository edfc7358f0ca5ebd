use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn rsm_binary() -> PathBuf {
	let mut path = std::env::current_exe().expect("current_exe should resolve");
	path.pop();
	path.pop();
	path.push("rsm");
	path
}

fn run_rsm(config_home: &Path, args: &[&str]) -> (bool, Value, String) {
	let output = Command::new(rsm_binary())
		.current_dir(config_home)
		.env("XDG_CONFIG_HOME", config_home)
		.env("HOME", config_home)
		.env_remove("RUST_LOG")
		.args(args)
		.output()
		.expect("failed to execute rsm");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or(Value::Null);
	(output.status.success(), parsed, stderr)
}

#[test]
fn config_defaults_when_no_file_exists() {
	let tmp = TempDir::new().expect("temp dir should be created");

	let (success, json, stderr) = run_rsm(tmp.path(), &["config"]);
	assert!(success, "config failed: {stderr}");
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "config");
	assert_eq!(json["data"]["shutdownTimeoutMs"], 5000);
	assert_eq!(json["data"]["restartTimeoutMs"], 5000);
	assert!(json["data"].get("startTimeoutMs").is_none());
	assert!(json["data"].get("source").is_none());
}

#[test]
fn config_reads_default_location() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let dir = tmp.path().join("rsm");
	std::fs::create_dir_all(&dir).expect("config dir should be created");
	std::fs::write(dir.join("config.json"), r#"{"restartTimeoutMs": 1200}"#).expect("config should be written");

	let (success, json, stderr) = run_rsm(tmp.path(), &["config"]);
	assert!(success, "config failed: {stderr}");
	assert_eq!(json["data"]["restartTimeoutMs"], 1200);
	assert_eq!(json["data"]["shutdownTimeoutMs"], 5000);
	assert!(json["data"]["source"].as_str().unwrap().ends_with("rsm/config.json"));
}

#[test]
fn explicit_config_wins_over_default_location() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let dir = tmp.path().join("rsm");
	std::fs::create_dir_all(&dir).expect("config dir should be created");
	std::fs::write(dir.join("config.json"), r#"{"restartTimeoutMs": 1200}"#).expect("config should be written");
	let explicit = tmp.path().join("explicit.json");
	std::fs::write(&explicit, r#"{"startTimeoutMs": 300}"#).expect("config should be written");

	let (success, json, stderr) = run_rsm(tmp.path(), &["config", "--config", explicit.to_str().unwrap()]);
	assert!(success, "config failed: {stderr}");
	assert_eq!(json["data"]["restartTimeoutMs"], 5000);
	assert_eq!(json["data"]["startTimeoutMs"], 300);
	assert_eq!(json["inputs"]["configPath"], explicit.to_str().unwrap());
}

#[test]
fn invalid_config_reports_config_error() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let explicit = tmp.path().join("broken.json");
	std::fs::write(&explicit, "{ not json").expect("config should be written");

	let (success, json, _stderr) = run_rsm(tmp.path(), &["config", "--config", explicit.to_str().unwrap()]);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn verbose_flag_keeps_stdout_json() {
	let tmp = TempDir::new().expect("temp dir should be created");

	let (success, json, stderr) = run_rsm(tmp.path(), &["-vv", "config"]);
	assert!(success, "config failed: {stderr}");
	assert_eq!(json["ok"], true);
}
