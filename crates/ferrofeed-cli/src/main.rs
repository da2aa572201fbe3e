mod cli;
mod commands;
mod error;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only JSON results.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let output = commands::run(&cli).await?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output.data)?
    } else {
        serde_json::to_string(&output.data)?
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;

    Ok(ExitCode::from(output.exit_code))
}
