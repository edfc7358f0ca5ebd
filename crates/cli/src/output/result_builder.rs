use std::io::{self, Write};
use std::time::Instant;

use colored::Colorize;
use serde::Serialize;

use crate::output::format::OutputFormat;
use crate::output::model::{CommandError, CommandInputs, CommandResult, Diagnostic, DiagnosticLevel, EffectiveConfig, ErrorCode, SCHEMA_VERSION};

/// Assembles a [`CommandResult`] envelope; the duration is measured from [`ResultBuilder::new`].
pub struct ResultBuilder<T: Serialize> {
	command: String,
	started: Instant,
	inputs: Option<CommandInputs>,
	data: Option<T>,
	error: Option<CommandError>,
	duration_ms: Option<u64>,
	diagnostics: Vec<Diagnostic>,
	config: Option<EffectiveConfig>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			started: Instant::now(),
			inputs: None,
			data: None,
			error: None,
			duration_ms: None,
			diagnostics: Vec::new(),
			config: None,
		}
	}

	pub fn inputs(mut self, inputs: CommandInputs) -> Self {
		self.inputs = Some(inputs);
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.failure(CommandError {
			code,
			message: message.into(),
			details: None,
		})
	}

	/// Marks the command failed with an error already in output form.
	pub fn failure(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	/// Adds a diagnostic attributed to `source`, e.g. `step 3`.
	pub fn diagnostic_with_source(mut self, level: DiagnosticLevel, message: impl Into<String>, source: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
			source: Some(source.into()),
		});
		self
	}

	pub fn config(mut self, config: EffectiveConfig) -> Self {
		self.config = Some(config);
		self
	}

	/// Overrides the measured duration.
	pub fn duration_ms(mut self, duration_ms: u64) -> Self {
		self.duration_ms = Some(duration_ms);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok: self.error.is_none() && self.data.is_some(),
			command: self.command,
			inputs: self.inputs,
			data: self.data,
			error: self.error,
			duration_ms: Some(self.duration_ms.unwrap_or_else(|| u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX))),
			diagnostics: self.diagnostics,
			config: self.config,
		}
	}
}

/// Writes `result` to stdout in `format`.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format.render_json(result) {
		Some(Ok(json)) => println!("{json}"),
		Some(Err(err)) => eprintln!("failed to serialize {} result: {err}", result.command),
		None => print_result_text(result),
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	let mut stdout = io::stdout().lock();

	if let Some(json) = result.data.as_ref().and_then(|data| serde_json::to_string_pretty(data).ok()) {
		let _ = writeln!(stdout, "{json}");
	}

	if let Some(error) = &result.error {
		let _ = writeln!(stdout, "{} [{}]: {}", "Error".red().bold(), error.code, error.message);
	}

	for diag in &result.diagnostics {
		let level = match diag.level {
			DiagnosticLevel::Info => "info".normal(),
			DiagnosticLevel::Warning => "warning".yellow(),
			DiagnosticLevel::Error => "error".red(),
		};
		match &diag.source {
			Some(source) => {
				let _ = writeln!(stdout, "[{level}] {source}: {}", diag.message);
			}
			None => {
				let _ = writeln!(stdout, "[{level}] {}", diag.message);
			}
		}
	}

	if let Some(source) = result.config.as_ref().and_then(|config| config.source.as_ref()) {
		let _ = writeln!(stdout, "{} {}", "config:".dimmed(), source.display());
	}
	if let Some(duration_ms) = result.duration_ms {
		let _ = writeln!(stdout, "{} in {duration_ms}ms", result.command);
	}
}
