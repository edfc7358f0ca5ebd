//! Scenario files driven by `rsm simulate`.
//!
//! A scenario registers runtimes against the in-memory provider and lists the
//! lifecycle steps to run:
//!
//! ```json
//! {
//!   "config": { "shutdownTimeoutMs": 200 },
//!   "runtimes": [
//!     { "runtimeId": "py", "languageId": "python", "languageVersion": "3.12", "runtimeName": "Python 3.12",
//!       "behavior": { "shutdown": { "kind": "neverExit" } } }
//!   ],
//!   "steps": [
//!     { "op": "start", "runtimeId": "py" },
//!     { "op": "parallel", "steps": [
//!       { "op": "restart", "target": { "console": "python" } },
//!       { "op": "shutdown", "target": { "console": "python" } }
//!     ] },
//!     { "op": "status" }
//!   ]
//! }
//! ```

use std::path::Path;

use rsm_protocol::{RuntimeExitReason, RuntimeMetadata, SessionMode};
use rsm_runtime::SessionServiceConfig;
use rsm_runtime::fake::FakeBehavior;
use serde::Deserialize;
use url::Url;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
	/// Replaces the configuration from `--config` when present.
	#[serde(default)]
	pub config: Option<SessionServiceConfig>,
	#[serde(default)]
	pub runtimes: Vec<RuntimeSpec>,
	pub steps: Vec<Step>,
}

/// A runtime registered before the steps run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
	#[serde(flatten)]
	pub metadata: RuntimeMetadata,
	/// How the provider's sessions for this runtime behave.
	#[serde(default)]
	pub behavior: Option<FakeBehavior>,
	/// Mark as the preferred runtime for its language.
	#[serde(default)]
	pub preferred: bool,
}

/// Names a session by what it is bound to, or by id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetRef {
	Console(String),
	Notebook(Url),
	Session(String),
}

impl std::fmt::Display for TargetRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TargetRef::Console(language_id) => write!(f, "console '{language_id}'"),
			TargetRef::Notebook(uri) => write!(f, "notebook {uri}"),
			TargetRef::Session(session_id) => write!(f, "session {session_id}"),
		}
	}
}

fn default_reason() -> String {
	"scenario".to_string()
}

fn default_exit_reason() -> RuntimeExitReason {
	RuntimeExitReason::Shutdown
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "op")]
pub enum Step {
	/// Start a session; notebook mode is implied by `notebookUri`.
	Start {
		runtime_id: String,
		#[serde(default)]
		mode: Option<SessionMode>,
		#[serde(default)]
		notebook_uri: Option<Url>,
		#[serde(default)]
		session_name: Option<String>,
		#[serde(default = "default_reason")]
		reason: String,
	},
	StartPreferred {
		language_id: String,
		#[serde(default = "default_reason")]
		reason: String,
	},
	Select {
		runtime_id: String,
		#[serde(default = "default_reason")]
		reason: String,
	},
	Restart {
		target: TargetRef,
		#[serde(default = "default_reason")]
		reason: String,
	},
	Shutdown {
		target: TargetRef,
		#[serde(default = "default_exit_reason")]
		reason: RuntimeExitReason,
	},
	ForceQuit {
		target: TargetRef,
	},
	Interrupt {
		target: TargetRef,
	},
	/// Make the session exit on its own, as a crashed runtime would.
	Crash {
		target: TargetRef,
		#[serde(default)]
		exit_code: Option<i32>,
	},
	RenameNotebook {
		from: Url,
		to: Url,
	},
	/// Set the foreground console; clears it when `target` is omitted.
	Foreground {
		#[serde(default)]
		target: Option<TargetRef>,
	},
	Sleep {
		ms: u64,
	},
	Status,
	/// Submit every child step before awaiting any of them.
	Parallel {
		steps: Vec<Step>,
	},
}

impl Step {
	pub fn op(&self) -> &'static str {
		match self {
			Step::Start { .. } => "start",
			Step::StartPreferred { .. } => "startPreferred",
			Step::Select { .. } => "select",
			Step::Restart { .. } => "restart",
			Step::Shutdown { .. } => "shutdown",
			Step::ForceQuit { .. } => "forceQuit",
			Step::Interrupt { .. } => "interrupt",
			Step::Crash { .. } => "crash",
			Step::RenameNotebook { .. } => "renameNotebook",
			Step::Foreground { .. } => "foreground",
			Step::Sleep { .. } => "sleep",
			Step::Status => "status",
			Step::Parallel { .. } => "parallel",
		}
	}
}

impl Scenario {
	pub fn load(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path).map_err(|source| CliError::ScenarioIo {
			path: path.to_path_buf(),
			source,
		})?;
		let scenario: Scenario = serde_json::from_str(&contents).map_err(|source| CliError::ScenarioJson {
			path: path.to_path_buf(),
			source,
		})?;
		scenario.validate()?;
		Ok(scenario)
	}

	fn validate(&self) -> Result<()> {
		if self.steps.is_empty() {
			return Err(CliError::InvalidScenario("scenario has no steps".to_string()));
		}
		validate_steps(&self.steps)
	}
}

fn validate_steps(steps: &[Step]) -> Result<()> {
	for step in steps {
		if let Step::Parallel { steps } = step {
			if steps.is_empty() {
				return Err(CliError::InvalidScenario("parallel step has no children".to_string()));
			}
			if steps.iter().any(|child| matches!(child, Step::Parallel { .. })) {
				return Err(CliError::InvalidScenario("parallel steps cannot be nested".to_string()));
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use rsm_runtime::fake::ShutdownBehavior;
	use tempfile::NamedTempFile;

	use super::*;

	fn write_scenario(contents: &str) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn parse_full_scenario() {
		let file = write_scenario(
			r#"{
				"config": { "shutdownTimeoutMs": 200 },
				"runtimes": [
					{ "runtimeId": "py", "languageId": "python", "languageVersion": "3.12", "runtimeName": "Python",
					  "behavior": { "shutdown": { "kind": "neverExit" } }, "preferred": true }
				],
				"steps": [
					{ "op": "start", "runtimeId": "py" },
					{ "op": "start", "runtimeId": "py", "notebookUri": "file:///nb.ipynb", "reason": "open" },
					{ "op": "parallel", "steps": [
						{ "op": "restart", "target": { "console": "python" } },
						{ "op": "shutdown", "target": { "notebook": "file:///nb.ipynb" }, "reason": "switchRuntime" }
					] },
					{ "op": "crash", "target": { "session": "python-00000001" }, "exitCode": 3 },
					{ "op": "foreground" },
					{ "op": "status" }
				]
			}"#,
		);

		let scenario = Scenario::load(file.path()).unwrap();
		assert_eq!(scenario.config.unwrap().shutdown_timeout_ms, 200);
		assert_eq!(scenario.runtimes[0].metadata.runtime_id, "py");
		assert!(scenario.runtimes[0].preferred);
		assert_eq!(scenario.runtimes[0].behavior.as_ref().unwrap().shutdown, ShutdownBehavior::NeverExit);

		let ops: Vec<_> = scenario.steps.iter().map(Step::op).collect();
		assert_eq!(ops, vec!["start", "start", "parallel", "crash", "foreground", "status"]);
		match &scenario.steps[1] {
			Step::Start { notebook_uri, reason, .. } => {
				assert_eq!(notebook_uri.as_ref().map(Url::as_str), Some("file:///nb.ipynb"));
				assert_eq!(reason, "open");
			}
			other => panic!("Expected Start step, got {other:?}"),
		}
		match &scenario.steps[2] {
			Step::Parallel { steps } => match &steps[1] {
				Step::Shutdown { reason, .. } => assert_eq!(*reason, RuntimeExitReason::SwitchRuntime),
				other => panic!("Expected Shutdown step, got {other:?}"),
			},
			other => panic!("Expected Parallel step, got {other:?}"),
		}
	}

	#[test]
	fn empty_scenario_is_rejected() {
		let file = write_scenario(r#"{ "runtimes": [], "steps": [] }"#);
		assert!(matches!(Scenario::load(file.path()), Err(CliError::InvalidScenario(_))));
	}

	#[test]
	fn nested_parallel_is_rejected() {
		let file = write_scenario(r#"{ "steps": [ { "op": "parallel", "steps": [ { "op": "parallel", "steps": [ { "op": "status" } ] } ] } ] }"#);
		assert!(matches!(Scenario::load(file.path()), Err(CliError::InvalidScenario(_))));
	}

	#[test]
	fn unknown_op_reports_path() {
		let file = write_scenario(r#"{ "steps": [ { "op": "explode" } ] }"#);
		let err = Scenario::load(file.path()).unwrap_err();
		assert!(matches!(err, CliError::ScenarioJson { .. }));
		assert!(err.to_string().contains(&file.path().display().to_string()));
	}
}
