//! `specwatch` command-line host for the workspace status engines.

mod specwatch_cmd;

pub use specwatch_cmd::{SpecwatchCli, SpecwatchSubcommand, StatusArgs, WatchArgs};

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `debug` for the
/// engine and `warn` for everything else.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose {
        "warn,specwatch_engine=debug,specwatch_cli=debug"
    } else {
        "warn"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
