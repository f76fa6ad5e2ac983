use carelake_core::{default_fixes, fix_file, EnvelopeError};
use serde::Serialize;
use serde_json::Value;

use crate::cli::{Cli, FixDatesArgs};
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct FixDatesResponseData {
    dry_run: bool,
    changed_files: usize,
    applied: usize,
    already_applied: usize,
    results: Value,
}

pub fn run(args: &FixDatesArgs, cli: &Cli) -> Result<CommandResult, CliError> {
    let mut results = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for file_fixes in default_fixes() {
        match fix_file(&cli.views_dir, &file_fixes, args.dry_run) {
            Ok(result) => {
                if result.missing {
                    warnings.push(format!("{}: not found, skipped", result.file));
                }
                results.push(result);
            }
            Err(error) => {
                errors.push(
                    EnvelopeError::new("fix_dates.io", error.to_string())
                        .with_subject(file_fixes.file),
                );
            }
        }
    }

    let data = serde_json::to_value(FixDatesResponseData {
        dry_run: args.dry_run,
        changed_files: results.iter().filter(|r| r.changed).count(),
        applied: results.iter().map(|r| r.applied).sum(),
        already_applied: results.iter().map(|r| r.already_applied).sum(),
        results: serde_json::to_value(&results)?,
    })?;

    Ok(CommandResult::ok(data)
        .with_warnings(warnings)
        .with_errors(errors))
}
