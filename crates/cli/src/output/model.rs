use std::path::PathBuf;

use rsm_protocol::{RuntimeState, SessionMode};
use rsm_runtime::SessionServiceConfig;
use rsm_runtime::fake::FakeCall;
use serde::{Deserialize, Serialize};
use url::Url;

/// Current schema version for command output.
pub const SCHEMA_VERSION: u32 = 1;

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inputs: Option<CommandInputs>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub diagnostics: Vec<Diagnostic>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub config: Option<EffectiveConfig>,
}

/// Inputs used for a command execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandInputs {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scenario: Option<PathBuf>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub config_path: Option<PathBuf>,
}

/// Error information for failed commands and steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	NotFound,
	Conflict,
	Timeout,
	NoManager,
	ProviderFailure,
	InvalidInput,
	ConfigError,
	IoError,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::NotFound => write!(f, "NOT_FOUND"),
			ErrorCode::Conflict => write!(f, "CONFLICT"),
			ErrorCode::Timeout => write!(f, "TIMEOUT"),
			ErrorCode::NoManager => write!(f, "NO_MANAGER"),
			ErrorCode::ProviderFailure => write!(f, "PROVIDER_FAILURE"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
			ErrorCode::IoError => write!(f, "IO_ERROR"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

/// Diagnostic message attached to a command result.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
	pub level: DiagnosticLevel,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
	Info,
	Warning,
	Error,
}

/// Effective configuration used for command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
	#[serde(flatten)]
	pub service: SessionServiceConfig,
	/// File the configuration was read from; defaults when absent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<PathBuf>,
}

/// Outcome of a `simulate` run.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
	pub steps: Vec<StepReport>,
	/// Sessions that have not exited when the scenario ends.
	pub sessions: Vec<SessionSnapshot>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub foreground: Option<String>,
	/// Provider calls in the order the service made them.
	pub calls: Vec<FakeCall>,
	pub events: Vec<EventRecord>,
}

/// Outcome of a single scenario step.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
	pub index: usize,
	pub op: String,
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	pub elapsed_ms: u64,
	/// Snapshot taken by a `status` step.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sessions: Option<Vec<SessionSnapshot>>,
	/// Children of a `parallel` step.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub steps: Vec<StepReport>,
}

/// Point-in-time view of an active session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
	pub session_id: String,
	pub runtime_id: String,
	pub language_id: String,
	pub mode: SessionMode,
	pub state: RuntimeState,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub notebook_uri: Option<Url>,
	pub foreground: bool,
}

/// A service event observed during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub event: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

/// A command result with no payload data.
pub type EmptyResult = CommandResult<()>;
