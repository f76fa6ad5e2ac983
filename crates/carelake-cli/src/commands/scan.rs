use carelake_core::{scan_file, EnvelopeError, ViewManifest};
use serde::Serialize;
use serde_json::Value;

use crate::cli::Cli;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ScanResponseData {
    scanned: usize,
    with_date_ops: usize,
    with_issues: usize,
    missing: Vec<String>,
    reports: Value,
}

pub fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let resolved = ViewManifest::default().resolve(&cli.views_dir);

    let mut reports = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for file in &resolved.present {
        match scan_file(file) {
            Ok(report) => {
                for issue in report.issues() {
                    warnings.push(format!("{}: {issue}", report.file));
                }
                reports.push(report);
            }
            Err(error) => {
                errors.push(
                    EnvelopeError::new("scan.io", error.to_string())
                        .with_subject(file.file_name().to_owned()),
                );
            }
        }
    }

    let data = serde_json::to_value(ScanResponseData {
        scanned: reports.len(),
        with_date_ops: reports.iter().filter(|r| r.has_date_ops()).count(),
        with_issues: reports.iter().filter(|r| !r.issues().is_empty()).count(),
        missing: resolved.missing.clone(),
        reports: serde_json::to_value(&reports)?,
    })?;

    Ok(CommandResult::ok(data)
        .with_warnings(warnings)
        .with_errors(errors))
}
