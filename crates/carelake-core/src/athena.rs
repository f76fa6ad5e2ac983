//! Wire types for the query service's AWS-JSON-1.1 API surface.
//!
//! Only the three operations the toolkit uses are modeled:
//! `StartQueryExecution`, `GetQueryExecution`, and `GetQueryResults`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    /// Terminal states end the polling loop.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionContext<'a> {
    pub database: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultConfiguration<'a> {
    pub output_location: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionInput<'a> {
    pub query_string: &'a str,
    pub query_execution_context: QueryExecutionContext<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_configuration: Option<ResultConfiguration<'a>>,
    /// Idempotency token; retried submissions reuse the same token so
    /// the service does not start the query twice.
    pub client_request_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionOutput {
    pub query_execution_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryExecutionInput<'a> {
    pub query_execution_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionStatus {
    pub state: QueryState,
    #[serde(default)]
    pub state_change_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecution {
    pub status: QueryExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryExecutionOutput {
    pub query_execution: QueryExecution,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsInput<'a> {
    pub query_execution_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsOutput {
    #[serde(default)]
    pub result_set: ResultSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub column_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSetMetadata {
    #[serde(default)]
    pub column_info: Vec<ColumnInfo>,
}

/// A single cell. A missing `VarCharValue` is a SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Datum {
    #[serde(default)]
    pub var_char_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    #[serde(default)]
    pub data: Vec<Datum>,
}

impl Row {
    /// Cell value at `index`; `None` covers both NULL and short rows.
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.data
            .get(index)
            .and_then(|datum| datum.var_char_value.as_deref())
    }
}

/// First page of query results.
///
/// For SELECT queries the service repeats the column names as the
/// first row, so data access skips it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSet {
    #[serde(default)]
    pub result_set_metadata: ResultSetMetadata,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Build a result set the way the service would return it, header
    /// row included. Used by the scripted mock service.
    pub fn from_rows(columns: &[&str], rows: &[Vec<Option<&str>>]) -> Self {
        let header = Row {
            data: columns
                .iter()
                .map(|name| Datum {
                    var_char_value: Some((*name).to_owned()),
                })
                .collect(),
        };

        let mut all_rows = vec![header];
        all_rows.extend(rows.iter().map(|row| Row {
            data: row
                .iter()
                .map(|cell| Datum {
                    var_char_value: cell.map(str::to_owned),
                })
                .collect(),
        }));

        Self {
            result_set_metadata: ResultSetMetadata {
                column_info: columns
                    .iter()
                    .map(|name| ColumnInfo {
                        name: (*name).to_owned(),
                        column_type: None,
                    })
                    .collect(),
            },
            rows: all_rows,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.result_set_metadata
            .column_info
            .iter()
            .map(|info| info.name.as_str())
            .collect()
    }

    /// Rows excluding the repeated header row.
    pub fn data_rows(&self) -> &[Row] {
        if self.rows.is_empty() {
            &[]
        } else {
            &self.rows[1..]
        }
    }

    /// True when the query returned nothing beyond the header.
    pub fn has_no_data(&self) -> bool {
        self.rows.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_state_terminal_classification() {
        assert!(QueryState::Succeeded.is_terminal());
        assert!(QueryState::Failed.is_terminal());
        assert!(QueryState::Cancelled.is_terminal());
        assert!(!QueryState::Queued.is_terminal());
        assert!(!QueryState::Running.is_terminal());
    }

    #[test]
    fn query_state_parses_service_tokens() {
        let state: QueryState = serde_json::from_str("\"SUCCEEDED\"").expect("parse");
        assert_eq!(state, QueryState::Succeeded);
    }

    #[test]
    fn start_query_input_serializes_pascal_case() {
        let input = StartQueryExecutionInput {
            query_string: "SELECT 1",
            query_execution_context: QueryExecutionContext {
                database: "fhir_prd_db",
            },
            result_configuration: Some(ResultConfiguration {
                output_location: "s3://results/",
            }),
            client_request_token: String::from("token-1"),
        };

        let json = serde_json::to_value(&input).expect("serialize");
        assert_eq!(json["QueryString"], "SELECT 1");
        assert_eq!(json["QueryExecutionContext"]["Database"], "fhir_prd_db");
        assert_eq!(json["ResultConfiguration"]["OutputLocation"], "s3://results/");
        assert_eq!(json["ClientRequestToken"], "token-1");
    }

    #[test]
    fn execution_output_parses_state_and_reason() {
        let body = r#"{
            "QueryExecution": {
                "Status": {
                    "State": "FAILED",
                    "StateChangeReason": "SYNTAX_ERROR: line 3"
                }
            }
        }"#;

        let output: GetQueryExecutionOutput = serde_json::from_str(body).expect("parse");
        assert_eq!(output.query_execution.status.state, QueryState::Failed);
        assert_eq!(
            output.query_execution.status.state_change_reason.as_deref(),
            Some("SYNTAX_ERROR: line 3")
        );
    }

    #[test]
    fn missing_var_char_value_reads_as_null() {
        let body = r#"{
            "ResultSet": {
                "Rows": [
                    {"Data": [{"VarCharValue": "pd_birth_date"}]},
                    {"Data": [{}]}
                ]
            }
        }"#;

        let output: GetQueryResultsOutput = serde_json::from_str(body).expect("parse");
        let data_rows = output.result_set.data_rows();
        assert_eq!(data_rows.len(), 1);
        assert_eq!(data_rows[0].cell(0), None);
    }

    #[test]
    fn header_only_result_set_has_no_data() {
        let set = ResultSet::from_rows(&["pd_birth_date"], &[]);
        assert!(set.has_no_data());
        assert!(set.data_rows().is_empty());
    }

    #[test]
    fn from_rows_round_trips_cells_through_accessors() {
        let set = ResultSet::from_rows(
            &["appointment_date", "appointment_status"],
            &[vec![Some("2019-07-01"), Some("fulfilled")], vec![None, Some("booked")]],
        );

        assert_eq!(set.column_names(), ["appointment_date", "appointment_status"]);
        let rows = set.data_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cell(0), Some("2019-07-01"));
        assert_eq!(rows[1].cell(0), None);
        assert_eq!(rows[1].cell(1), Some("booked"));
    }
}
