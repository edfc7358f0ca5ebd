use clap::ValueEnum;
use serde::Serialize;

/// How command results are written to stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Indented JSON envelope
	#[default]
	Json,
	/// The envelope on one line, for piping
	Ndjson,
	/// Payload JSON followed by coloured errors and diagnostics
	Text,
}

impl OutputFormat {
	/// Serializes `value` for the JSON formats; `None` for [`OutputFormat::Text`].
	pub fn render_json<T: Serialize>(self, value: &T) -> Option<serde_json::Result<String>> {
		match self {
			OutputFormat::Json => Some(serde_json::to_string_pretty(value)),
			OutputFormat::Ndjson => Some(serde_json::to_string(value)),
			OutputFormat::Text => None,
		}
	}
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.to_possible_value() {
			Some(value) => f.write_str(value.get_name()),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_match_cli_values() {
		assert_eq!(OutputFormat::Ndjson.to_string(), "ndjson");
		assert_eq!(OutputFormat::from_str("TEXT", true), Ok(OutputFormat::Text));
	}

	#[test]
	fn ndjson_renders_on_one_line() {
		let rendered = OutputFormat::Ndjson.render_json(&serde_json::json!({ "a": [1, 2] })).unwrap().unwrap();
		assert!(!rendered.contains('\n'));
		assert!(OutputFormat::Text.render_json(&()).is_none());
	}
}
