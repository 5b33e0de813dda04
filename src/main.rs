//! stackplan CLI — validate, order and apply declarative infrastructure templates.

use clap::Parser;
use stackplan::cli::Cli;
use stackplan::config::{Config, LogFormat};

/// Install the global subscriber. `RUST_LOG` wins over `-v`, which wins over
/// the configured level. Logs go to stderr so command output stays clean.
fn init_tracing(config: &Config, verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = match verbose {
        0 => config.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match config.log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

fn main() {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config, cli.verbose);
    tracing::debug!(stack = %config.stack, state_dir = %config.state_dir.display(), "loaded configuration");

    if let Err(e) = stackplan::cli::dispatch(cli.command, &config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
