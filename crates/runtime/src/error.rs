//! Error taxonomy for session lifecycle operations.

use std::sync::Arc;

use url::Url;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors rejected by lifecycle operations.
///
/// Errors are `Clone` so that coalesced operations can hand the same outcome
/// to every waiter. None of them are retried by the manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("unknown runtime: {0}")]
	UnknownRuntime(String),

	#[error("runtime {0} is already registered")]
	DuplicateRuntime(String),

	#[error("no runtime registered for language '{0}'")]
	NoRuntimeForLanguage(String),

	#[error("unknown session: {0}")]
	UnknownSession(String),

	#[error("a notebook URI is required to start a notebook session for {runtime_name}")]
	MissingNotebookUri { runtime_name: String },

	#[error(
		"cannot start {requested_runtime} for {target}: {existing_runtime} is already {existing_state} there (start reason: {start_reason})"
	)]
	ConflictingRuntime {
		target: String,
		existing_runtime: String,
		existing_state: String,
		requested_runtime: String,
		start_reason: String,
	},

	/// The target is still held by a session that was asked to shut down and has not exited.
	#[error("session {session_id} is still exiting from {target}; force quit it to free the target")]
	SessionExiting { session_id: String, target: String },

	#[error("no session manager found for runtime {runtime_name} ({runtime_id})")]
	NoManagerFound { runtime_id: String, runtime_name: String },

	#[error("session {session_id} did not finish starting within {timeout_ms} ms")]
	StartTimeout { session_id: String, timeout_ms: u64 },

	#[error("session {session_id} did not become ready within {timeout_ms} ms of restarting")]
	RestartTimeout { session_id: String, timeout_ms: u64 },

	#[error("session {session_id} did not exit within {timeout_ms} ms of shutting down")]
	ShutdownTimeout { session_id: String, timeout_ms: u64 },

	#[error("notebook {0} already has a session")]
	NotebookUriInUse(Url),

	#[error("session {0} is not a console session and cannot be foreground")]
	InvalidForeground(String),

	/// Failure raised by the session provider itself, surfaced verbatim.
	#[error("{0:#}")]
	Provider(Arc<anyhow::Error>),
}

impl Error {
	pub(crate) fn provider(err: anyhow::Error) -> Self {
		Error::Provider(Arc::new(err))
	}

	pub fn is_timeout(&self) -> bool {
		matches!(
			self,
			Error::StartTimeout { .. } | Error::RestartTimeout { .. } | Error::ShutdownTimeout { .. }
		)
	}

	pub fn is_conflict(&self) -> bool {
		matches!(self, Error::ConflictingRuntime { .. })
	}
}

/// Failure loading a [`SessionServiceConfig`](crate::config::SessionServiceConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Io {
		path: std::path::PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {}: {source}", path.display())]
	Json {
		path: std::path::PathBuf,
		#[source]
		source: serde_json::Error,
	},
}
