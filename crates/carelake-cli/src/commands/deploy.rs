use std::sync::Arc;

use carelake_core::{
    DeployStatus, Deployer, EnvelopeError, QueryService, ServiceConfig, ViewManifest,
};
use serde::Serialize;
use serde_json::Value;

use crate::cli::{Cli, DeployArgs};
use crate::error::CliError;

use super::{poll_config, CommandResult};

#[derive(Debug, Serialize)]
struct DeployResponseData {
    deployed: usize,
    failed: usize,
    skipped: usize,
    records: Value,
}

pub async fn run(
    args: &DeployArgs,
    cli: &Cli,
    config: &ServiceConfig,
    service: Arc<dyn QueryService>,
) -> Result<CommandResult, CliError> {
    let full = ViewManifest::default();
    let (manifest, unknown) = if args.only.is_empty() {
        (full, Vec::new())
    } else {
        // Accept bare view names as well as file names. Unknown names
        // are reported with the spelling the operator used.
        let mut selected = Vec::new();
        let mut unknown = Vec::new();
        for name in &args.only {
            let file = if name.ends_with(".sql") {
                name.clone()
            } else {
                format!("{name}.sql")
            };
            if full.entries().contains(&file) {
                selected.push(file);
            } else {
                unknown.push(name.clone());
            }
        }
        let (filtered, _) = full.filtered(&selected);
        (filtered, unknown)
    };

    if manifest.is_empty() {
        return Err(CliError::Command(format!(
            "no known views selected; unknown names: {}",
            unknown.join(", ")
        )));
    }

    let deployer = Deployer::new(service, &config.database).with_poll(poll_config(cli));
    let report = deployer.deploy_manifest(&cli.views_dir, &manifest).await;

    let mut warnings: Vec<String> = unknown
        .iter()
        .map(|name| format!("'{name}' is not a known view; ignored"))
        .collect();
    warnings.extend(report.records.iter().filter_map(|record| {
        matches!(record.status, DeployStatus::SkippedMissing)
            .then(|| format!("{}: no SQL file found, skipped", record.view))
    }));

    let errors = report
        .failures()
        .map(|record| {
            let message = match &record.status {
                DeployStatus::Failed { reason } => reason.clone(),
                DeployStatus::TimedOut { attempts } => {
                    format!("still running after {attempts} status checks")
                }
                _ => unreachable!("failures() only yields failing records"),
            };
            EnvelopeError::new("deploy.failed", message).with_subject(record.view.clone())
        })
        .collect();

    let data = serde_json::to_value(DeployResponseData {
        deployed: report.deployed(),
        failed: report.failed(),
        skipped: report.skipped(),
        records: serde_json::to_value(&report.records)?,
    })?;

    Ok(CommandResult::ok(data)
        .with_database(config.database.clone())
        .with_warnings(warnings)
        .with_errors(errors))
}
