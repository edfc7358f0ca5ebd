//! Runtime state as reported by a session implementation.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// Transitions are driven by the session itself; the manager only observes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeState {
	#[default]
	Uninitialized,
	Initializing,
	Starting,
	Ready,
	Idle,
	Busy,
	Restarting,
	Interrupting,
	Exiting,
	Exited,
	Offline,
}

impl RuntimeState {
	/// Returns `true` once the session has started and can accept work.
	pub fn is_running(self) -> bool {
		matches!(
			self,
			RuntimeState::Ready | RuntimeState::Idle | RuntimeState::Busy | RuntimeState::Interrupting | RuntimeState::Offline
		)
	}

	/// Returns `true` while the session is on its way up.
	pub fn is_starting(self) -> bool {
		matches!(self, RuntimeState::Uninitialized | RuntimeState::Initializing | RuntimeState::Starting)
	}

	pub fn is_exited(self) -> bool {
		self == RuntimeState::Exited
	}
}

impl std::fmt::Display for RuntimeState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			RuntimeState::Uninitialized => "uninitialized",
			RuntimeState::Initializing => "initializing",
			RuntimeState::Starting => "starting",
			RuntimeState::Ready => "ready",
			RuntimeState::Idle => "idle",
			RuntimeState::Busy => "busy",
			RuntimeState::Restarting => "restarting",
			RuntimeState::Interrupting => "interrupting",
			RuntimeState::Exiting => "exiting",
			RuntimeState::Exited => "exited",
			RuntimeState::Offline => "offline",
		};
		f.write_str(name)
	}
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeExitReason {
	StartupFailed,
	Shutdown,
	ForcedQuit,
	Restart,
	SwitchRuntime,
	Error,
	#[default]
	Unknown,
}

/// End-of-session event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeExit {
	pub runtime_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exit_code: Option<i32>,
	pub reason: RuntimeExitReason,
	#[serde(default)]
	pub message: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn running_and_starting_are_disjoint() {
		for state in [
			RuntimeState::Uninitialized,
			RuntimeState::Initializing,
			RuntimeState::Starting,
			RuntimeState::Ready,
			RuntimeState::Idle,
			RuntimeState::Busy,
			RuntimeState::Restarting,
			RuntimeState::Exiting,
			RuntimeState::Exited,
		] {
			assert!(!(state.is_running() && state.is_starting()), "{state} is both running and starting");
		}
		assert!(RuntimeState::Uninitialized.is_starting());
		assert!(!RuntimeState::Exited.is_running());
	}
}
