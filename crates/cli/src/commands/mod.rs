pub mod config;
mod simulate;

use crate::cli::{Cli, Commands};
use crate::error::Result;

/// Runs the parsed command.
///
/// Returns `Ok(false)` when the command printed its own failed result and the
/// process should exit non-zero.
pub async fn dispatch(cli: Cli) -> Result<bool> {
	let ok = match cli.command {
		Commands::Simulate(args) => simulate::run(args, cli.config, cli.format).await?,
		Commands::Config => config::run(cli.config, cli.format)?,
	};

	Ok(ok)
}
