//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter directive for a `-v` count when `RUST_LOG` is unset.
pub fn default_directive(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	}
}

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over `-v`.
pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
		.try_init();
}
