use clap::Parser;

use carelake_cli::cli::Cli;
use carelake_cli::error::CliError;
use carelake_cli::{commands, output};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let envelope = commands::run(&cli).await?;
    output::render(&envelope, cli.format, cli.pretty)?;

    commands::exit_policy(&envelope, cli.strict)
}
