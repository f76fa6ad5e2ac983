//! Live-data validation probes.
//!
//! After views deploy, probes select a handful of columns from each
//! clinical view and count NULLs per column, so regressions in the
//! date-parsing expressions show up as null spikes instead of being
//! discovered downstream.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::poll::{run_to_completion, PollConfig, QueryOutcome};
use crate::service::{QueryService, StartQuery};

/// Probes never select more columns than this, however many the probe lists.
pub const MAX_PROBE_COLUMNS: usize = 10;

const DEFAULT_ROW_LIMIT: u32 = 20;
const SAMPLE_ROWS: usize = 3;

/// One view's validation probe: which columns to select and how to
/// scope the probe to a single patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    pub view: String,
    pub columns: Vec<String>,
    pub patient_column: Option<String>,
}

impl ProbeSpec {
    pub fn new(view: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            view: view.into(),
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            patient_column: None,
        }
    }

    pub fn with_patient_column(mut self, column: impl Into<String>) -> Self {
        self.patient_column = Some(column.into());
        self
    }

    /// Columns actually probed, capped at `MAX_PROBE_COLUMNS`.
    pub fn probed_columns(&self) -> &[String] {
        let cap = self.columns.len().min(MAX_PROBE_COLUMNS);
        &self.columns[..cap]
    }

    /// Builds the probe SELECT. Single quotes in the patient id are
    /// doubled so the literal cannot break out of the string.
    pub fn sql(&self, patient_id: Option<&str>, limit: u32) -> String {
        let columns = self.probed_columns();
        let select_list = columns.join(", ");

        let mut sql = format!(
            "SELECT {select_list} FROM {view} WHERE {first} IS NOT NULL",
            view = self.view,
            first = columns[0],
        );

        if let (Some(column), Some(patient)) = (self.patient_column.as_deref(), patient_id) {
            let escaped = patient.replace('\'', "''");
            sql.push_str(&format!(" AND {column} = '{escaped}'"));
        }

        sql.push_str(&format!(" LIMIT {limit}"));
        sql
    }
}

/// NULL tally for one probed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnNulls {
    pub column: String,
    pub nulls: usize,
}

/// Terminal result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Checked {
        rows: usize,
        /// Columns actually tallied; fewer than requested when the
        /// result came back narrower.
        columns: Vec<String>,
        null_counts: Vec<ColumnNulls>,
        /// First few data rows keyed by column name, for eyeballing
        /// the values.
        sample: Vec<BTreeMap<String, Option<String>>>,
    },
    /// The query succeeded but returned no rows.
    NoData,
    Failed {
        reason: String,
    },
    TimedOut {
        attempts: u32,
    },
}

impl ProbeOutcome {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }

    /// True when every tallied cell was non-NULL.
    pub fn all_populated(&self) -> bool {
        match self {
            Self::Checked { null_counts, .. } => null_counts.iter().all(|c| c.nulls == 0),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub view: String,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

/// Aggregate result of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub probes: Vec<ProbeReport>,
}

impl ValidationReport {
    pub fn checked(&self) -> usize {
        self.probes
            .iter()
            .filter(|p| matches!(p.outcome, ProbeOutcome::Checked { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.probes.iter().filter(|p| p.outcome.is_failure()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs validation probes through a query service.
pub struct Validator {
    service: Arc<dyn QueryService>,
    database: String,
    poll: PollConfig,
    row_limit: u32,
}

impl Validator {
    pub fn new(service: Arc<dyn QueryService>, database: impl Into<String>) -> Self {
        Self {
            service,
            database: database.into(),
            poll: PollConfig::default(),
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_row_limit(mut self, row_limit: u32) -> Self {
        self.row_limit = row_limit;
        self
    }

    /// Runs one probe. Service errors become a `Failed` outcome so a
    /// broken view never aborts the rest of the run.
    pub async fn run_probe(&self, spec: &ProbeSpec, patient_id: Option<&str>) -> ProbeReport {
        // A probe without columns has no SELECT list to build; fail it
        // without touching the service.
        let outcome = if spec.probed_columns().is_empty() {
            ProbeOutcome::Failed {
                reason: String::from("probe lists no columns"),
            }
        } else {
            let sql = spec.sql(patient_id, self.row_limit);
            self.execute_probe(spec, &sql).await
        };

        ProbeReport {
            view: spec.view.clone(),
            outcome,
        }
    }

    /// Runs every probe in order.
    pub async fn run_all(&self, specs: &[ProbeSpec], patient_id: Option<&str>) -> ValidationReport {
        let mut report = ValidationReport::default();
        for spec in specs {
            report.probes.push(self.run_probe(spec, patient_id).await);
        }
        report
    }

    async fn execute_probe(&self, spec: &ProbeSpec, sql: &str) -> ProbeOutcome {
        let request = match StartQuery::new(sql, &self.database) {
            Ok(request) => request,
            Err(error) => {
                return ProbeOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        };

        let (handle, outcome) =
            match run_to_completion(self.service.as_ref(), request, self.poll).await {
                Ok(result) => result,
                Err(error) => {
                    return ProbeOutcome::Failed {
                        reason: error.to_string(),
                    };
                }
            };

        match outcome {
            QueryOutcome::Succeeded => {}
            QueryOutcome::Failed { reason } => return ProbeOutcome::Failed { reason },
            QueryOutcome::Cancelled { reason } => {
                return ProbeOutcome::Failed {
                    reason: format!(
                        "cancelled: {}",
                        reason.unwrap_or_else(|| String::from("no reason given"))
                    ),
                };
            }
            QueryOutcome::TimedOut { attempts } => return ProbeOutcome::TimedOut { attempts },
        }

        let results = match self
            .service
            .fetch_results(&handle, self.row_limit.saturating_add(1))
            .await
        {
            Ok(results) => results,
            Err(error) => {
                return ProbeOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        };

        if results.has_no_data() {
            return ProbeOutcome::NoData;
        }

        let mut columns = spec.probed_columns().to_vec();
        // The service may return fewer columns than asked for; tally
        // only what actually came back.
        let returned = results.column_names().len();
        if returned > 0 {
            columns.truncate(returned);
        }

        let data_rows = results.data_rows();

        let null_counts = columns
            .iter()
            .enumerate()
            .map(|(index, column)| ColumnNulls {
                column: column.clone(),
                nulls: data_rows.iter().filter(|row| row.cell(index).is_none()).count(),
            })
            .collect();

        let sample = data_rows
            .iter()
            .take(SAMPLE_ROWS)
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| (column.clone(), row.cell(index).map(str::to_owned)))
                    .collect()
            })
            .collect();

        ProbeOutcome::Checked {
            rows: data_rows.len(),
            columns,
            null_counts,
            sample,
        }
    }
}

/// Standard probes for the views whose date expressions have broken
/// before.
pub fn default_probes() -> Vec<ProbeSpec> {
    vec![
        ProbeSpec::new(
            "v_procedures_tumor",
            &["patient_id", "procedure_date", "proc_code", "proc_display"],
        )
        .with_patient_column("patient_id"),
        ProbeSpec::new(
            "v_patient_demographics",
            &["patient_id", "pd_birth_date", "gender"],
        )
        .with_patient_column("patient_id"),
        ProbeSpec::new(
            "v_appointments",
            &["patient_id", "appointment_date", "appointment_status"],
        )
        .with_patient_column("patient_id"),
        ProbeSpec::new(
            "v_imaging",
            &["patient_id", "imaging_date", "modality", "report_status"],
        )
        .with_patient_column("patient_id"),
        ProbeSpec::new(
            "v_medications",
            &["patient_id", "medication_date", "medication_name"],
        )
        .with_patient_column("patient_id"),
    ]
}
