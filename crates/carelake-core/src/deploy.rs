//! Sequential view deployment engine.
//!
//! Views are deployed one at a time in manifest order so that views
//! referencing earlier views always see their dependencies in place.
//! A view that fails never aborts the run; it is recorded and the
//! remaining views still deploy.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use carelake_sql::{ViewFile, ViewManifest};

use crate::poll::{run_to_completion, PollConfig, QueryOutcome};
use crate::service::{QueryService, StartQuery};

/// Terminal status of one view's deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeployStatus {
    Deployed,
    Failed { reason: String },
    /// The view's SQL file was not found under the views directory.
    SkippedMissing,
    TimedOut { attempts: u32 },
}

impl DeployStatus {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }
}

/// Per-view deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewDeployment {
    pub view: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(flatten)]
    pub status: DeployStatus,
}

/// Aggregate result of a manifest deployment run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub records: Vec<ViewDeployment>,
}

impl DeployReport {
    pub fn deployed(&self) -> usize {
        self.count(|s| matches!(s, DeployStatus::Deployed))
    }

    pub fn failed(&self) -> usize {
        self.count(DeployStatus::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, DeployStatus::SkippedMissing))
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ViewDeployment> {
        self.records.iter().filter(|r| r.status.is_failure())
    }

    fn count(&self, predicate: impl Fn(&DeployStatus) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.status)).count()
    }
}

/// Deploys `CREATE OR REPLACE VIEW` statements through a query service.
pub struct Deployer {
    service: Arc<dyn QueryService>,
    database: String,
    poll: PollConfig,
}

impl Deployer {
    pub fn new(service: Arc<dyn QueryService>, database: impl Into<String>) -> Self {
        Self {
            service,
            database: database.into(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Submits one view definition and polls it to completion. Service
    /// errors become a `Failed` status rather than aborting the caller.
    pub async fn deploy_source(&self, sql: &str) -> DeployStatus {
        let request = match StartQuery::new(sql, &self.database) {
            Ok(request) => request,
            Err(error) => {
                return DeployStatus::Failed {
                    reason: error.to_string(),
                };
            }
        };

        match run_to_completion(self.service.as_ref(), request, self.poll).await {
            Ok((_, QueryOutcome::Succeeded)) => DeployStatus::Deployed,
            Ok((_, QueryOutcome::Failed { reason })) => DeployStatus::Failed { reason },
            Ok((_, QueryOutcome::Cancelled { reason })) => DeployStatus::Failed {
                reason: format!(
                    "cancelled: {}",
                    reason.unwrap_or_else(|| String::from("no reason given"))
                ),
            },
            Ok((_, QueryOutcome::TimedOut { attempts })) => DeployStatus::TimedOut { attempts },
            Err(error) => DeployStatus::Failed {
                reason: error.to_string(),
            },
        }
    }

    /// Deploys every manifest view found under `views_dir`, in order.
    /// Missing files are recorded as skipped, not as failures.
    pub async fn deploy_manifest(
        &self,
        views_dir: &std::path::Path,
        manifest: &ViewManifest,
    ) -> DeployReport {
        let mut report = DeployReport::default();

        for entry in manifest.entries() {
            // Manifest entries are file names; the view label drops the
            // extension.
            let view = entry.strip_suffix(".sql").unwrap_or(entry).to_owned();
            let view_file = ViewFile::new(views_dir.join(entry));

            if !view_file.exists() {
                report.records.push(ViewDeployment {
                    view,
                    file: None,
                    status: DeployStatus::SkippedMissing,
                });
                continue;
            }

            let status = match view_file.read() {
                Ok(sql) => self.deploy_source(&sql).await,
                Err(error) => DeployStatus::Failed {
                    reason: error.to_string(),
                },
            };

            report.records.push(ViewDeployment {
                view,
                file: Some(view_file.path().to_owned()),
                status,
            });
        }

        report
    }
}
