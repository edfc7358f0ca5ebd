use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "rsm")]
#[command(about = "Runtime session manager - drive session lifecycles from scenario files")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	/// Service configuration file (defaults to <config dir>/rsm/config.json when present)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run a lifecycle scenario against the in-memory provider
	#[command(alias = "sim")]
	Simulate(SimulateArgs),

	/// Show the effective service configuration
	Config,
}

impl Commands {
	/// Command name reported in output envelopes.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Simulate(_) => "simulate",
			Commands::Config => "config",
		}
	}
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
	/// Scenario file (JSON)
	pub scenario: PathBuf,

	/// Stop at the first failing step
	#[arg(long)]
	pub fail_fast: bool,
}
