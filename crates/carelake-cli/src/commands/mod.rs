mod deploy;
mod fix_dates;
mod scan;
mod verify;

use std::sync::Arc;
use std::time::{Duration, Instant};

use carelake_core::{
    AthenaAdapter, Envelope, EnvelopeError, EnvelopeMeta, MockQueryService, PollConfig,
    QueryService, ReqwestHttpClient, ServiceConfig,
};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub database: Option<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            database: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let started = Instant::now();
    let config = effective_config(cli)?;

    let command_result = match &cli.command {
        Command::Deploy(args) => {
            deploy::run(args, cli, &config, service_for(cli, &config)?).await?
        }
        Command::FixDates(args) => fix_dates::run(args, cli)?,
        Command::Scan => scan::run(cli)?,
        Command::Verify(args) => {
            verify::run(args, cli, &config, service_for(cli, &config)?).await?
        }
    };

    let CommandResult {
        data,
        warnings,
        errors,
        database,
    } = command_result;

    let mut meta = EnvelopeMeta::new(started.elapsed().as_millis() as u64);
    if let Some(database) = database {
        meta = meta.with_database(database);
    }

    if cli.mock {
        meta.push_warning("--mock is set; no query reached the live service");
    }
    for warning in warnings {
        meta.push_warning(warning);
    }

    Ok(Envelope::with_errors(meta, data, errors))
}

/// Decides the process exit after the envelope has been rendered.
/// Strict mode rejects any warnings or errors; otherwise only an
/// envelope carrying errors fails the run.
pub fn exit_policy(envelope: &Envelope<Value>, strict: bool) -> Result<(), CliError> {
    if strict && (!envelope.meta.warnings.is_empty() || envelope.has_errors()) {
        return Err(CliError::StrictModeViolation {
            warning_count: envelope.meta.warnings.len(),
            error_count: envelope.errors.len(),
        });
    }

    if envelope.has_errors() {
        return Err(CliError::CommandFailed {
            error_count: envelope.errors.len(),
        });
    }

    Ok(())
}

fn effective_config(cli: &Cli) -> Result<ServiceConfig, CliError> {
    let mut config = ServiceConfig::from_env()?;

    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if let Some(output_location) = &cli.output_location {
        config.output_location = Some(output_location.clone());
    }

    Ok(config)
}

fn service_for(cli: &Cli, config: &ServiceConfig) -> Result<Arc<dyn QueryService>, CliError> {
    if cli.mock {
        return Ok(Arc::new(MockQueryService::new()));
    }

    config.require_output_location()?;
    Ok(Arc::new(AthenaAdapter::from_config(
        config,
        Arc::new(ReqwestHttpClient::new()),
    )))
}

fn poll_config(cli: &Cli) -> PollConfig {
    let interval = if cli.mock {
        Duration::ZERO
    } else {
        Duration::from_millis(cli.poll_interval_ms)
    };
    PollConfig::new(interval, cli.poll_max_attempts)
}
