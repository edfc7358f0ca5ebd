use std::path::PathBuf;

use rsm_runtime::{ConfigError, Error as SessionError};
use thiserror::Error;

use crate::output::ErrorCode;

#[derive(Error, Debug)]
pub enum CliError {
	#[error(transparent)]
	Session(#[from] SessionError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("failed to read scenario {}: {source}", path.display())]
	ScenarioIo {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid scenario {}: {source}", path.display())]
	ScenarioJson {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid scenario: {0}")]
	InvalidScenario(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Session(err) => session_error_code(err),
			CliError::Config(_) => ErrorCode::ConfigError,
			CliError::ScenarioIo { .. } | CliError::Io(_) => ErrorCode::IoError,
			CliError::ScenarioJson { .. } | CliError::InvalidScenario(_) => ErrorCode::InvalidInput,
		}
	}
}

/// Stable output code for a lifecycle error.
pub fn session_error_code(err: &SessionError) -> ErrorCode {
	match err {
		SessionError::UnknownRuntime(_) | SessionError::UnknownSession(_) | SessionError::NoRuntimeForLanguage(_) => ErrorCode::NotFound,
		SessionError::ConflictingRuntime { .. }
		| SessionError::SessionExiting { .. }
		| SessionError::NotebookUriInUse(_)
		| SessionError::DuplicateRuntime(_) => ErrorCode::Conflict,
		SessionError::StartTimeout { .. } | SessionError::RestartTimeout { .. } | SessionError::ShutdownTimeout { .. } => ErrorCode::Timeout,
		SessionError::NoManagerFound { .. } => ErrorCode::NoManager,
		SessionError::MissingNotebookUri { .. } | SessionError::InvalidForeground(_) => ErrorCode::InvalidInput,
		SessionError::Provider(_) => ErrorCode::ProviderFailure,
	}
}

pub type Result<T> = std::result::Result<T, CliError>;
