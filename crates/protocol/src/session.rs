//! Session descriptors created when a session start is admitted.

use serde::{Deserialize, Serialize};
use url::Url;

/// What a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
	/// An interactive console; at most one per language.
	Console,
	/// A notebook kernel; at most one per notebook document.
	Notebook,
}

impl std::fmt::Display for SessionMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionMode::Console => write!(f, "console"),
			SessionMode::Notebook => write!(f, "notebook"),
		}
	}
}

/// Immutable metadata for one session instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
	/// Unique identifier, never reused by the manager.
	pub session_id: String,
	pub session_mode: SessionMode,
	pub session_name: String,
	/// Free-text diagnostic describing why the session was started.
	pub start_reason: String,
	/// Notebook document; present iff `session_mode` is `Notebook`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notebook_uri: Option<Url>,
	/// Seconds since the Unix epoch.
	pub created_at: u64,
}

impl SessionMetadata {
	pub fn is_console(&self) -> bool {
		self.session_mode == SessionMode::Console
	}

	pub fn is_notebook(&self) -> bool {
		self.session_mode == SessionMode::Notebook
	}
}
