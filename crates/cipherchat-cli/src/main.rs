//! cipherchat CLI entry point

use cipherchat_cli::{Cli, Config, ExitCode, OutputFormatter};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let output = OutputFormatter::new(cli.output, cli.verbose);

    // File, then CIPHERCHAT_* environment, then flags.
    let config = match Config::load_from(cli.config.as_deref()).and_then(Config::with_env) {
        Ok(config) => config.with_overrides(&cli.overrides()),
        Err(e) => {
            eprintln!("Error: Config error: {e}");
            return ExitCode::InvalidInput.to_exit_code();
        }
    };

    let filter = EnvFilter::try_new(&config.logging.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries envelopes and plaintext, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.execute_with_config(config) {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            let code = ExitCode::for_error(&e);
            let message = format!("{e:#}");
            let text = output.format_error_with_code(&message, code);
            if !text.is_empty() {
                eprintln!("{text}");
            }
            code.to_exit_code()
        }
    }
}
