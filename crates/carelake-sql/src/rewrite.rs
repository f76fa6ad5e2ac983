//! COALESCE rewrite engine for single-format date parsing.
//!
//! A risky `TRY(date_parse(expr, fmt)) as alias,` projection is
//! rewritten to the tolerant dual-format pattern:
//!
//! ```sql
//! COALESCE(
//!     TRY(date_parse(expr, '%Y-%m-%dT%H:%i:%sZ')),
//!     TRY(date_parse(expr, '%Y-%m-%d'))
//! ) as alias,
//! ```
//!
//! Fixes are idempotent: a rule whose source pattern is absent is
//! counted as already applied and the file is left untouched.

use std::path::Path;

use regex::{NoExpand, Regex};
use serde::Serialize;

use crate::date_scan::{DATE_ONLY_FORMAT, ISO_TIMESTAMP_FORMAT};
use crate::error::SqlError;
use crate::view_file::ViewFile;

/// A single find-and-replace rule against view SQL text.
#[derive(Debug, Clone)]
pub enum DateFix {
    /// Whole-text literal replacement.
    Exact { old: String, new: String },
    /// Regex replacement (all occurrences, no capture expansion).
    Pattern { pattern: Regex, replacement: String },
}

impl DateFix {
    /// Apply the rule, returning the rewritten text when it matched.
    pub fn apply(&self, content: &str) -> Option<String> {
        match self {
            Self::Exact { old, new } => content
                .contains(old.as_str())
                .then(|| content.replace(old.as_str(), new)),
            Self::Pattern {
                pattern,
                replacement,
            } => pattern
                .is_match(content)
                .then(|| pattern.replace_all(content, NoExpand(replacement)).into_owned()),
        }
    }
}

/// The dual-format COALESCE projection for one column.
///
/// Indentation matches the view files' four-space body style, with the
/// opening `COALESCE(` left for the caller to indent.
pub fn coalesce_expression(expr: &str, alias: &str) -> String {
    format!(
        "COALESCE(\n        TRY(date_parse({expr}, '{ISO_TIMESTAMP_FORMAT}')),\n        TRY(date_parse({expr}, '{DATE_ONLY_FORMAT}'))\n    ) as {alias},"
    )
}

/// Exact-match fix for a date-only single-format projection line.
pub fn date_only_fix(expr: &str, alias: &str) -> DateFix {
    DateFix::Exact {
        old: format!("    TRY(date_parse({expr}, '{DATE_ONLY_FORMAT}')) as {alias},"),
        new: format!("    {}", coalesce_expression(expr, alias)),
    }
}

/// Regex fix for an ISO single-format projection line, matched at any
/// indentation.
pub fn iso_single_fix(expr: &str, alias: &str) -> DateFix {
    let literal = format!("TRY(date_parse({expr}, '{ISO_TIMESTAMP_FORMAT}')) as {alias},");
    let pattern =
        Regex::new(&regex::escape(&literal)).expect("escaped literal is a valid pattern");
    DateFix::Pattern {
        pattern,
        replacement: coalesce_expression(expr, alias),
    }
}

/// Fix rules for one view file.
#[derive(Debug, Clone)]
pub struct FileFixes {
    pub file: &'static str,
    pub fixes: Vec<DateFix>,
}

/// The known single-format date columns across the deployed view set,
/// from the date-column validation findings.
pub fn default_fixes() -> Vec<FileFixes> {
    vec![
        FileFixes {
            file: "v_patient_demographics.sql",
            fixes: vec![date_only_fix("pa.birth_date", "pd_birth_date")],
        },
        FileFixes {
            file: "v2_appointments.sql",
            fixes: vec![date_only_fix("NULLIF(a.start, '')", "appointment_date")],
        },
        FileFixes {
            file: "v_encounters.sql",
            fixes: vec![
                iso_single_fix("e.period_start", "period_start"),
                iso_single_fix("e.period_end", "period_end"),
            ],
        },
        FileFixes {
            file: "v2_imaging.sql",
            fixes: vec![
                iso_single_fix("dr.issued", "report_issued"),
                iso_single_fix("dr.effective_period_start", "report_effective_period_start"),
                iso_single_fix("dr.effective_period_stop", "report_effective_period_stop"),
            ],
        },
        FileFixes {
            file: "v_medications.sql",
            fixes: vec![
                iso_single_fix(
                    "mr.dispense_request_validity_period_start",
                    "mr_validity_period_start",
                ),
                iso_single_fix(
                    "mr.dispense_request_validity_period_end",
                    "mr_validity_period_end",
                ),
                iso_single_fix("mr.authored_on", "mr_authored_on"),
                iso_single_fix("cp.created", "cp_created"),
                iso_single_fix("cp.period_start", "cp_period_start"),
                iso_single_fix("cp.period_end", "cp_period_end"),
            ],
        },
    ]
}

/// Result of applying a rule set to SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub content: String,
    pub applied: usize,
    pub already_applied: usize,
}

/// Apply every rule to the text, tallying matches and no-ops.
pub fn apply_fixes(content: &str, fixes: &[DateFix]) -> FixOutcome {
    let mut current = content.to_owned();
    let mut applied = 0;
    let mut already_applied = 0;

    for fix in fixes {
        match fix.apply(&current) {
            Some(rewritten) => {
                current = rewritten;
                applied += 1;
            }
            None => already_applied += 1,
        }
    }

    FixOutcome {
        content: current,
        applied,
        already_applied,
    }
}

/// Per-file rewrite result.
#[derive(Debug, Clone, Serialize)]
pub struct FileFixResult {
    pub file: String,
    /// The file was not found in the views directory.
    pub missing: bool,
    pub applied: usize,
    pub already_applied: usize,
    pub changed: bool,
}

/// Apply one file's rule set on disk. With `dry_run` the would-be
/// counts are reported without writing.
pub fn fix_file(
    views_dir: &Path,
    file_fixes: &FileFixes,
    dry_run: bool,
) -> Result<FileFixResult, SqlError> {
    let view_file = ViewFile::new(views_dir.join(file_fixes.file));

    if !view_file.exists() {
        return Ok(FileFixResult {
            file: file_fixes.file.to_owned(),
            missing: true,
            applied: 0,
            already_applied: 0,
            changed: false,
        });
    }

    let content = view_file.read()?;
    let outcome = apply_fixes(&content, &file_fixes.fixes);
    let changed = outcome.applied > 0;

    if changed && !dry_run {
        view_file.write(&outcome.content)?;
    }

    Ok(FileFixResult {
        file: file_fixes.file.to_owned(),
        missing: false,
        applied: outcome.applied,
        already_applied: outcome.already_applied,
        changed,
    })
}
