//! SQL-side tooling for carelake.
//!
//! This crate contains:
//! - The ordered view deployment manifest and directory resolution
//! - View file access and `CREATE OR REPLACE VIEW` name extraction
//! - Static scanning of date-parsing expressions
//! - The COALESCE rewrite engine for single-format date columns

pub mod date_scan;
pub mod error;
pub mod manifest;
pub mod rewrite;
pub mod view_file;

pub use date_scan::{
    scan_file, scan_sql, DateExpressionKind, DateFinding, ScanReport, DATE_ONLY_FORMAT,
    ISO_TIMESTAMP_FORMAT,
};
pub use error::SqlError;
pub use manifest::{ResolvedManifest, ViewManifest, DEFAULT_DEPLOY_ORDER};
pub use rewrite::{
    apply_fixes, coalesce_expression, date_only_fix, default_fixes, fix_file, iso_single_fix,
    DateFix, FileFixResult, FileFixes, FixOutcome,
};
pub use view_file::{view_name, ViewFile};
