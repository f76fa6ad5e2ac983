use std::sync::Arc;

use carelake_core::{
    default_probes, EnvelopeError, ProbeOutcome, QueryService, ServiceConfig, Validator,
};
use serde::Serialize;
use serde_json::Value;

use crate::cli::{Cli, VerifyArgs};
use crate::error::CliError;

use super::{poll_config, CommandResult};

#[derive(Debug, Serialize)]
struct VerifyResponseData {
    checked: usize,
    failed: usize,
    probes: Value,
}

pub async fn run(
    args: &VerifyArgs,
    cli: &Cli,
    config: &ServiceConfig,
    service: Arc<dyn QueryService>,
) -> Result<CommandResult, CliError> {
    let mut specs = default_probes();
    if !args.only.is_empty() {
        specs.retain(|spec| args.only.contains(&spec.view));
        if specs.is_empty() {
            return Err(CliError::Command(format!(
                "no known probes selected from: {}",
                args.only.join(", ")
            )));
        }
    }

    let validator = Validator::new(service, &config.database).with_poll(poll_config(cli));
    let report = validator.run_all(&specs, args.patient.as_deref()).await;

    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for probe in &report.probes {
        match &probe.outcome {
            ProbeOutcome::NoData => {
                warnings.push(format!("{}: query returned no rows", probe.view));
            }
            ProbeOutcome::Checked { null_counts, rows, .. } => {
                for count in null_counts {
                    if count.nulls > 0 {
                        warnings.push(format!(
                            "{}: column {} has {} NULL(s) in {rows} rows",
                            probe.view, count.column, count.nulls
                        ));
                    }
                }
            }
            ProbeOutcome::Failed { reason } => {
                errors.push(
                    EnvelopeError::new("verify.failed", reason.clone())
                        .with_subject(probe.view.clone()),
                );
            }
            ProbeOutcome::TimedOut { attempts } => {
                errors.push(
                    EnvelopeError::new(
                        "verify.timeout",
                        format!("still running after {attempts} status checks"),
                    )
                    .with_subject(probe.view.clone()),
                );
            }
        }
    }

    let data = serde_json::to_value(VerifyResponseData {
        checked: report.checked(),
        failed: report.failed(),
        probes: serde_json::to_value(&report.probes)?,
    })?;

    Ok(CommandResult::ok(data)
        .with_database(config.database.clone())
        .with_warnings(warnings)
        .with_errors(errors))
}
