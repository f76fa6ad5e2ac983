use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Clinical data lake view deployment and validation toolkit.
#[derive(Debug, Parser)]
#[command(name = "carelake", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for the response envelope.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Fail (exit 5) when the envelope carries warnings or errors.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Use the in-memory mock service instead of the live query service.
    #[arg(long, global = true)]
    pub mock: bool,

    /// Directory containing the view SQL files.
    #[arg(long, global = true, default_value = "views")]
    pub views_dir: PathBuf,

    /// Target database, overriding CARELAKE_DATABASE.
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Service region, overriding CARELAKE_REGION.
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Result staging location, overriding CARELAKE_OUTPUT_LOCATION.
    #[arg(long, global = true)]
    pub output_location: Option<String>,

    /// Milliseconds between execution status checks.
    #[arg(long, global = true, default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Maximum status checks before a query counts as timed out.
    #[arg(long, global = true, default_value_t = 60)]
    pub poll_max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy view definitions in dependency order.
    Deploy(DeployArgs),
    /// Rewrite single-format date expressions to the dual-format form.
    FixDates(FixDatesArgs),
    /// Audit date-parsing expressions in view files without running anything.
    Scan,
    /// Probe deployed views for NULL date columns.
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Deploy only these views (still in manifest order).
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}

#[derive(Debug, Args)]
pub struct FixDatesArgs {
    /// Report the would-be changes without writing any file.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Restrict the probes to a single patient id.
    #[arg(long)]
    pub patient: Option<String>,

    /// Probe only these views.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}
