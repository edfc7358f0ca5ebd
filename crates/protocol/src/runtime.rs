//! Runtime descriptors produced at discovery time.

use serde::{Deserialize, Serialize};

/// Where a runtime's sessions execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionLocation {
	/// Runs in a local process managed by the host.
	#[default]
	Machine,
	/// Runs inside the workspace's execution environment.
	Workspace,
	/// Runs in the browser (e.g. a wasm interpreter).
	Browser,
}

/// Hint describing when a runtime should be started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartupBehavior {
	/// May be started as soon as it is discovered.
	Immediate,
	/// Started when a document of its language is opened.
	#[default]
	Implicit,
	/// Only started on explicit user request.
	Explicit,
	/// Never started automatically and never auto-selected.
	Manual,
}

/// Immutable descriptor of an installed language runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetadata {
	/// Unique identifier of this runtime.
	pub runtime_id: String,
	/// Language identifier, e.g. `python` or `r`.
	pub language_id: String,
	/// Human readable language name.
	#[serde(default)]
	pub language_name: String,
	/// Version of the language implemented by this runtime.
	pub language_version: String,
	/// Display name of the runtime, e.g. `Python 3.12.1 (venv)`.
	pub runtime_name: String,
	/// Version of the runtime implementation itself.
	#[serde(default)]
	pub runtime_version: String,
	#[serde(default)]
	pub session_location: SessionLocation,
	#[serde(default)]
	pub startup_behavior: StartupBehavior,
}

impl RuntimeMetadata {
	/// Creates metadata with the required identity fields; the rest take defaults.
	pub fn new(
		runtime_id: impl Into<String>,
		language_id: impl Into<String>,
		language_version: impl Into<String>,
		runtime_name: impl Into<String>,
	) -> Self {
		let language_id = language_id.into();
		Self {
			runtime_id: runtime_id.into(),
			language_name: language_id.clone(),
			language_id,
			language_version: language_version.into(),
			runtime_name: runtime_name.into(),
			runtime_version: String::new(),
			session_location: SessionLocation::default(),
			startup_behavior: StartupBehavior::default(),
		}
	}

	pub fn with_session_location(mut self, location: SessionLocation) -> Self {
		self.session_location = location;
		self
	}

	pub fn with_startup_behavior(mut self, behavior: StartupBehavior) -> Self {
		self.startup_behavior = behavior;
		self
	}

	pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
		self.runtime_version = version.into();
		self
	}
}
