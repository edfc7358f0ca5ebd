use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};
use tempfile::TempDir;

fn rsm_binary() -> PathBuf {
	let mut path = std::env::current_exe().expect("current_exe should resolve");
	path.pop();
	path.pop();
	path.push("rsm");
	path
}

fn runtimes() -> Value {
	json!([
		{ "runtimeId": "r1", "languageId": "test", "languageVersion": "1.0", "runtimeName": "Runtime One" },
		{ "runtimeId": "r2", "languageId": "test", "languageVersion": "2.0", "runtimeName": "Runtime Two" }
	])
}

fn run_scenario(workdir: &Path, scenario: Value, extra: &[&str]) -> (bool, Value, String) {
	let path = workdir.join("scenario.json");
	std::fs::write(&path, scenario.to_string()).expect("scenario should be written");

	let output = Command::new(rsm_binary())
		.current_dir(workdir)
		.env("XDG_CONFIG_HOME", workdir)
		.env("HOME", workdir)
		.env_remove("RUST_LOG")
		.arg("simulate")
		.arg(&path)
		.args(extra)
		.output()
		.expect("failed to execute rsm");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(output.status.success(), parsed, stderr)
}

#[test]
fn simulate_console_start_reports_ready_foreground_session() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "start", "runtimeId": "r1" },
			{ "op": "status" }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "simulate");

	let data = &json["data"];
	assert_eq!(data["steps"][0]["sessionId"], "test-00000001");
	assert_eq!(data["steps"][1]["sessions"][0]["state"], "ready");
	assert_eq!(data["steps"][1]["sessions"][0]["foreground"], true);
	assert_eq!(data["foreground"], "test-00000001");
	assert_eq!(data["calls"][0]["call"], "create");
	assert_eq!(data["calls"][1]["call"], "start");

	let events: Vec<&str> = data["events"].as_array().unwrap().iter().map(|event| event["event"].as_str().unwrap()).collect();
	let will_start = events.iter().position(|event| *event == "willStartSession").unwrap();
	let did_start = events.iter().position(|event| *event == "didStartRuntime").unwrap();
	assert!(will_start < did_start);
}

#[test]
fn simulate_parallel_starts_of_different_runtimes_conflict() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "parallel", "steps": [
				{ "op": "start", "runtimeId": "r1" },
				{ "op": "start", "runtimeId": "r2", "reason": "user picked r2" }
			] }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");

	let children = &json["data"]["steps"][0]["steps"];
	assert_eq!(children[0]["ok"], true);
	assert_eq!(children[1]["ok"], false);
	assert_eq!(children[1]["error"]["code"], "CONFLICT");
	let message = children[1]["error"]["message"].as_str().unwrap();
	assert!(message.contains("Runtime One"), "{message}");
	assert!(message.contains("Runtime Two"), "{message}");
	assert!(message.contains("user picked r2"), "{message}");

	assert_eq!(json["diagnostics"][0]["source"], "step 0.1");
	let creates = json["data"]["calls"].as_array().unwrap().iter().filter(|call| call["call"] == "create").count();
	assert_eq!(creates, 1);
}

#[test]
fn simulate_concurrent_notebook_starts_share_one_session() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "parallel", "steps": [
				{ "op": "start", "runtimeId": "r1", "notebookUri": "file:///nb.ipynb" },
				{ "op": "start", "runtimeId": "r1", "notebookUri": "file:///nb.ipynb" }
			] }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");

	let children = &json["data"]["steps"][0]["steps"];
	assert_eq!(children[0]["sessionId"], children[1]["sessionId"]);
	let creates = json["data"]["calls"].as_array().unwrap().iter().filter(|call| call["call"] == "create").count();
	assert_eq!(creates, 1);
	assert!(json["data"].get("foreground").is_none());
}

#[test]
fn simulate_shutdown_timeout_then_force_quit_frees_console() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"config": { "shutdownTimeoutMs": 50 },
		"runtimes": [
			{ "runtimeId": "r1", "languageId": "test", "languageVersion": "1.0", "runtimeName": "Runtime One",
			  "behavior": { "shutdown": { "kind": "neverExit" } } }
		],
		"steps": [
			{ "op": "start", "runtimeId": "r1" },
			{ "op": "shutdown", "target": { "console": "test" } },
			{ "op": "status" },
			{ "op": "start", "runtimeId": "r1" },
			{ "op": "forceQuit", "target": { "session": "test-00000001" } },
			{ "op": "status" }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");

	let steps = &json["data"]["steps"];
	assert_eq!(steps[1]["error"]["code"], "TIMEOUT");
	assert_eq!(steps[2]["sessions"][0]["sessionId"], "test-00000001");
	assert_eq!(steps[2]["sessions"][0]["state"], "exiting");
	assert_eq!(steps[3]["error"]["code"], "CONFLICT");
	assert!(steps[3]["error"]["message"].as_str().unwrap().contains("force quit"));
	assert_eq!(steps[4]["ok"], true);
	assert_eq!(steps[5]["sessions"], json!([]));
	assert_eq!(json["data"]["calls"].as_array().unwrap().iter().filter(|call| call["call"] == "create").count(), 1);
	assert_eq!(json["config"]["shutdownTimeoutMs"], 50);
}

#[test]
fn simulate_crash_frees_console_and_reports_exit() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "start", "runtimeId": "r1" },
			{ "op": "crash", "target": { "console": "test" }, "exitCode": 137 },
			{ "op": "start", "runtimeId": "r2" }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");

	let data = &json["data"];
	assert_eq!(data["steps"][2]["ok"], true);
	assert_eq!(data["steps"][2]["sessionId"], "test-00000002");
	assert_eq!(data["sessions"][0]["runtimeId"], "r2");
	assert!(
		data["events"]
			.as_array()
			.unwrap()
			.iter()
			.any(|event| event["event"] == "didEndSession" && event["detail"] == "error")
	);
}

#[test]
fn simulate_rename_notebook_moves_session() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "start", "runtimeId": "r1", "notebookUri": "file:///untitled.ipynb" },
			{ "op": "renameNotebook", "from": "file:///untitled.ipynb", "to": "file:///saved.ipynb" },
			{ "op": "status" }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");

	let steps = &json["data"]["steps"];
	assert_eq!(steps[1]["sessionId"], "test-00000001");
	assert_eq!(steps[2]["sessions"][0]["notebookUri"], "file:///saved.ipynb");
	assert_eq!(steps[2]["sessions"][0]["mode"], "notebook");
}

#[test]
fn simulate_fail_fast_stops_and_exits_non_zero() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "restart", "target": { "console": "test" } },
			{ "op": "start", "runtimeId": "r1" }
		]
	});

	let (success, json, _stderr) = run_scenario(tmp.path(), scenario, &["--fail-fast"]);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "NOT_FOUND");
	assert_eq!(json["data"]["steps"].as_array().unwrap().len(), 1);
	assert_eq!(json["data"]["calls"], json!([]));
}

#[test]
fn simulate_without_fail_fast_reports_failed_steps() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let scenario = json!({
		"runtimes": runtimes(),
		"steps": [
			{ "op": "start", "runtimeId": "missing" },
			{ "op": "startPreferred", "languageId": "test" }
		]
	});

	let (success, json, stderr) = run_scenario(tmp.path(), scenario, &[]);
	assert!(success, "simulate failed: {stderr}");
	assert_eq!(json["data"]["steps"][0]["error"]["code"], "NOT_FOUND");
	assert_eq!(json["data"]["steps"][1]["ok"], true);
	assert_eq!(json["data"]["sessions"][0]["runtimeId"], "r2");
	assert_eq!(json["diagnostics"][0]["level"], "warning");
}

#[test]
fn simulate_rejects_empty_scenario() {
	let tmp = TempDir::new().expect("temp dir should be created");

	let (success, json, _stderr) = run_scenario(tmp.path(), json!({ "steps": [] }), &[]);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["command"], "simulate");
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}

#[test]
fn simulate_missing_scenario_is_io_error() {
	let tmp = TempDir::new().expect("temp dir should be created");

	let output = Command::new(rsm_binary())
		.env("XDG_CONFIG_HOME", tmp.path())
		.args(["simulate", "does-not-exist.json"])
		.current_dir(tmp.path())
		.output()
		.expect("failed to execute rsm");

	assert!(!output.status.success());
	let json: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
	assert_eq!(json["error"]["code"], "IO_ERROR");
}
