use clap::Parser;
use rsm_cli::cli::Cli;
use rsm_cli::output::{EmptyResult, ResultBuilder, print_result};
use rsm_cli::{commands, logging};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let command = cli.command.name();
	let format = cli.format;

	match commands::dispatch(cli).await {
		Ok(true) => {}
		Ok(false) => std::process::exit(1),
		Err(err) => {
			error!(target = "rsm", error = %err, "command failed");
			let result: EmptyResult = ResultBuilder::new(command).error(err.code(), err.to_string()).build();
			print_result(&result, format);
			std::process::exit(1);
		}
	}
}
