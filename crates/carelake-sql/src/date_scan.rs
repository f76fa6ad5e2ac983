//! Static audit of date-parsing expressions in view SQL.
//!
//! Upstream FHIR exports encode dates inconsistently: some columns
//! carry full ISO 8601 timestamps, others date-only strings. A view
//! that parses with a single format silently yields NULL for the
//! other encoding, so every `date_parse` call is classified here as
//! either the tolerant dual-format COALESCE pattern or a risky
//! single-format call.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::SqlError;
use crate::view_file::{view_name, ViewFile};

/// Primary timestamp format tried by patched views.
pub const ISO_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%i:%sZ";

/// Date-only fallback format.
pub const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Classification of a date expression found in view SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateExpressionKind {
    /// `date_parse` wrapped in COALESCE over both formats.
    CoalesceDual,
    /// `date_parse` with only the date-only format.
    DateOnlySingle,
    /// `date_parse` with only the ISO timestamp format.
    IsoSingle,
    /// `date_parse` with a format this scanner does not recognize.
    Unclassified,
    /// `CAST ... AS TIMESTAMP`.
    CastTimestamp,
}

impl DateExpressionKind {
    pub const fn is_risky(self) -> bool {
        matches!(self, Self::DateOnlySingle | Self::IsoSingle)
    }

    pub const fn describe(self) -> &'static str {
        match self {
            Self::CoalesceDual => "date_parse with COALESCE (good)",
            Self::DateOnlySingle => "date_parse single format %Y-%m-%d (risky)",
            Self::IsoSingle => "date_parse single format ISO8601 (risky)",
            Self::Unclassified => "date_parse (check manually)",
            Self::CastTimestamp => "CAST AS TIMESTAMP",
        }
    }
}

/// One date operation found in a SQL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateFinding {
    /// 1-based line number.
    pub line: usize,
    /// The `as <alias>` capture, or "unknown" when the line has none.
    pub column: String,
    pub kind: DateExpressionKind,
}

impl DateFinding {
    pub fn issue(&self) -> Option<String> {
        self.kind.is_risky().then(|| {
            format!(
                "line {}: {} uses {}",
                self.line,
                self.column,
                self.kind.describe()
            )
        })
    }
}

/// Scan result for one view file.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub file: String,
    pub view: Option<String>,
    pub findings: Vec<DateFinding>,
}

impl ScanReport {
    pub fn has_date_ops(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn issues(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter_map(DateFinding::issue)
            .collect()
    }
}

fn alias_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)as\s+(\w+)").expect("alias pattern is valid"))
}

fn cast_timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)CAST.*AS\s+TIMESTAMP").expect("cast pattern is valid"))
}

fn column_alias(line: &str) -> String {
    alias_pattern()
        .captures(line)
        .map(|captures| captures[1].to_owned())
        .unwrap_or_else(|| String::from("unknown"))
}

/// Scan SQL text line by line for date-parsing operations.
pub fn scan_sql(sql: &str) -> Vec<DateFinding> {
    // The format literals are matched with their surrounding quotes so
    // the date-only literal cannot match inside the ISO literal.
    let date_only_literal = format!("'{DATE_ONLY_FORMAT}'");
    let iso_literal = format!("'{ISO_TIMESTAMP_FORMAT}'");

    let mut findings = Vec::new();

    // Multi-line COALESCE blocks (the rewriter's output shape) span
    // from a bare `COALESCE(` line to the `) as alias,` line; the
    // inner date_parse lines belong to the block, not to themselves.
    let mut block_start: Option<usize> = None;
    let mut block_has_parse = false;

    for (index, line) in sql.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();

        if let Some(start) = block_start {
            if trimmed.to_ascii_lowercase().contains("date_parse") {
                block_has_parse = true;
            }
            if trimmed.starts_with(')') {
                if block_has_parse {
                    findings.push(DateFinding {
                        line: start,
                        column: column_alias(line),
                        kind: DateExpressionKind::CoalesceDual,
                    });
                }
                block_start = None;
                block_has_parse = false;
            }
            continue;
        }

        if trimmed.ends_with("COALESCE(") {
            block_start = Some(line_number);
            continue;
        }

        if line.to_ascii_lowercase().contains("date_parse") {
            let has_date_only = line.contains(&date_only_literal);
            let has_iso = line.contains(&iso_literal);

            let kind = if line.contains("COALESCE") {
                DateExpressionKind::CoalesceDual
            } else if has_date_only && !has_iso {
                DateExpressionKind::DateOnlySingle
            } else if has_iso && !has_date_only {
                DateExpressionKind::IsoSingle
            } else {
                DateExpressionKind::Unclassified
            };

            findings.push(DateFinding {
                line: line_number,
                column: column_alias(line),
                kind,
            });
        }

        if cast_timestamp_pattern().is_match(line) {
            findings.push(DateFinding {
                line: line_number,
                column: column_alias(line),
                kind: DateExpressionKind::CastTimestamp,
            });
        }
    }

    findings
}

/// Scan a view file, labeling the report with its extracted view name.
pub fn scan_file(file: &ViewFile) -> Result<ScanReport, SqlError> {
    let sql = file.read()?;
    Ok(ScanReport {
        file: file.file_name().to_owned(),
        view: view_name(&sql),
        findings: scan_sql(&sql),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_dual_is_classified_as_good() {
        let sql = "    COALESCE(TRY(date_parse(e.start, '%Y-%m-%dT%H:%i:%sZ')), TRY(date_parse(e.start, '%Y-%m-%d'))) as period_start,";
        let findings = scan_sql(sql);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, DateExpressionKind::CoalesceDual);
        assert_eq!(findings[0].column, "period_start");
        assert!(!findings[0].kind.is_risky());
    }

    #[test]
    fn single_date_only_format_is_risky() {
        let sql = "    TRY(date_parse(pa.birth_date, '%Y-%m-%d')) as pd_birth_date,";
        let findings = scan_sql(sql);

        assert_eq!(findings[0].kind, DateExpressionKind::DateOnlySingle);
        assert!(findings[0].kind.is_risky());
    }

    #[test]
    fn single_iso_format_is_risky_and_not_mistaken_for_date_only() {
        // The ISO literal contains "%Y-%m-%d" as a substring; the quoted
        // comparison must not classify this as dual-format.
        let sql = "    TRY(date_parse(dr.issued, '%Y-%m-%dT%H:%i:%sZ')) as report_issued,";
        let findings = scan_sql(sql);

        assert_eq!(findings[0].kind, DateExpressionKind::IsoSingle);
    }

    #[test]
    fn cast_as_timestamp_is_reported_separately() {
        let sql = "    CAST(o.effective_datetime AS TIMESTAMP) as obs_datetime,";
        let findings = scan_sql(sql);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, DateExpressionKind::CastTimestamp);
        assert_eq!(findings[0].column, "obs_datetime");
    }

    #[test]
    fn multi_line_coalesce_block_is_one_dual_format_finding() {
        let sql = "\
SELECT
    COALESCE(
        TRY(date_parse(e.period_start, '%Y-%m-%dT%H:%i:%sZ')),
        TRY(date_parse(e.period_start, '%Y-%m-%d'))
    ) as period_start,
    e.status as encounter_status";
        let findings = scan_sql(sql);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, DateExpressionKind::CoalesceDual);
        assert_eq!(findings[0].column, "period_start");
        assert_eq!(findings[0].line, 2);
    }

    #[test]
    fn line_numbers_are_one_based() {
        let sql = "SELECT\n    TRY(date_parse(a.start, '%Y-%m-%d')) as start_date,\n    1";
        let findings = scan_sql(sql);

        assert_eq!(findings[0].line, 2);
    }

    #[test]
    fn line_without_alias_reports_unknown_column() {
        let sql = "WHERE date_parse(e.period_start, '%Y-%m-%d') > current_date";
        let findings = scan_sql(sql);

        assert_eq!(findings[0].column, "unknown");
    }

    #[test]
    fn issue_strings_cover_only_risky_findings() {
        let sql = "\
SELECT
    COALESCE(TRY(date_parse(x, '%Y-%m-%dT%H:%i:%sZ')), TRY(date_parse(x, '%Y-%m-%d'))) as good_col,
    TRY(date_parse(y, '%Y-%m-%d')) as risky_col
FROM t";
        let report = ScanReport {
            file: String::from("t.sql"),
            view: None,
            findings: scan_sql(sql),
        };

        let issues = report.issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("risky_col"));
    }
}
