//! Service configuration loaded from `config.json`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on shutdown and restart confirmation waits.
pub const DEFAULT_LIFECYCLE_TIMEOUT_MS: u64 = 5000;

/// Timing knobs for the lifecycle core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionServiceConfig {
	/// How long to wait for the end-of-session event after `shutdown`.
	pub shutdown_timeout_ms: u64,
	/// How long to wait for a restarted session to come back.
	pub restart_timeout_ms: u64,
	/// Bound on `start`; unbounded when absent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start_timeout_ms: Option<u64>,
}

impl Default for SessionServiceConfig {
	fn default() -> Self {
		Self {
			shutdown_timeout_ms: DEFAULT_LIFECYCLE_TIMEOUT_MS,
			restart_timeout_ms: DEFAULT_LIFECYCLE_TIMEOUT_MS,
			start_timeout_ms: None,
		}
	}
}

impl SessionServiceConfig {
	/// Reads a JSON config file. Missing fields take their defaults.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout_ms)
	}

	pub fn restart_timeout(&self) -> Duration {
		Duration::from_millis(self.restart_timeout_ms)
	}

	pub fn start_timeout(&self) -> Option<Duration> {
		self.start_timeout_ms.map(Duration::from_millis)
	}
}
