use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::SqlError;

/// A single SQL view definition file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFile {
    path: PathBuf,
}

impl ViewFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, or the full path when there is none.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_else(|| self.path.to_str().unwrap_or("<non-utf8 path>"))
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<String, SqlError> {
        fs::read_to_string(&self.path).map_err(|source| SqlError::Read {
            path: self.path.clone(),
            source,
        })
    }

    pub fn write(&self, content: &str) -> Result<(), SqlError> {
        fs::write(&self.path, content).map_err(|source| SqlError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn view_header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)CREATE\s+OR\s+REPLACE\s+VIEW\s+(\S+)\s+AS")
            .expect("view header pattern is valid")
    })
}

/// Extract the target view name from a `CREATE OR REPLACE VIEW <name> AS`
/// header. Returns `None` for SQL without one; the file is still
/// deployable, the service just reports its own error.
pub fn view_name(sql: &str) -> Option<String> {
    view_header_pattern()
        .captures(sql)
        .map(|captures| captures[1].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_view_name_from_header() {
        let sql = "CREATE OR REPLACE VIEW fhir_prd_db.v_encounters AS\nSELECT 1";
        assert_eq!(
            view_name(sql).as_deref(),
            Some("fhir_prd_db.v_encounters")
        );
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let sql = "create or replace view v_diagnoses as select 1";
        assert_eq!(view_name(sql).as_deref(), Some("v_diagnoses"));
    }

    #[test]
    fn sql_without_header_has_no_view_name() {
        assert_eq!(view_name("SELECT * FROM condition"), None);
    }

    #[test]
    fn header_not_on_first_line_is_still_found() {
        let sql = "-- imaging reports\nCREATE OR REPLACE VIEW v_imaging AS\nSELECT 1";
        assert_eq!(view_name(sql).as_deref(), Some("v_imaging"));
    }
}
