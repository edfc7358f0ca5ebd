use std::path::{Path, PathBuf};

use rsm_runtime::SessionServiceConfig;
use tracing::debug;

use crate::error::Result;
use crate::output::{CommandInputs, EffectiveConfig, OutputFormat, ResultBuilder, print_result};

/// `<config dir>/rsm/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("rsm").join("config.json"))
}

/// Loads the explicit config file, else the default one when it exists, else defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<EffectiveConfig> {
	let source = match explicit {
		Some(path) => Some(path.to_path_buf()),
		None => default_config_path().filter(|path| path.is_file()),
	};

	let service = match &source {
		Some(path) => {
			debug!(target = "rsm", path = %path.display(), "loading config");
			SessionServiceConfig::load(path)?
		}
		None => SessionServiceConfig::default(),
	};

	Ok(EffectiveConfig { service, source })
}

pub(crate) fn run(explicit: Option<PathBuf>, format: OutputFormat) -> Result<bool> {
	let effective = resolve_config(explicit.as_deref())?;
	let result = ResultBuilder::new("config")
		.inputs(CommandInputs {
			scenario: None,
			config_path: explicit,
		})
		.data(effective)
		.build();
	print_result(&result, format);
	Ok(true)
}
