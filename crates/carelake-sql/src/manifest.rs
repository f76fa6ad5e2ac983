use std::path::{Path, PathBuf};

use crate::view_file::ViewFile;

/// Canonical deployment order for the lake's view set.
///
/// Views are grouped by dependency layer: reference views first, then
/// base clinical views, then the enriched views that read from them.
/// Reordering this list can break deployment, because the query
/// service validates referenced relations at CREATE time.
pub const DEFAULT_DEPLOY_ORDER: [&str; 21] = [
    // Core reference views (no dependencies)
    "v_oid_reference.sql",
    "v_patient_demographics.sql",
    // Base clinical views
    "v_encounters.sql",
    "v_diagnoses.sql",
    "v_problem_list_diagnoses.sql",
    "v_binary_files.sql",
    // Procedure views
    "v2_procedure_specimen_link.sql",
    "v2_procedures_tumor.sql",
    // Document reference view
    "v2_document_reference_enriched.sql",
    // Imaging views
    "v2_imaging.sql",
    // Medication/chemo views
    "v_medications.sql",
    "v_chemo_medications.sql",
    "v_chemo_treatment_episodes.sql",
    // Radiation views (in dependency order)
    "v_radiation_documents.sql",
    "v_radiation_care_plan_hierarchy.sql",
    "v2_radiation_treatment_episodes.sql",
    "v2_radiation_episode_enrichment.sql",
    // Molecular/pathology
    "v_molecular_tests.sql",
    "v_pathology_diagnostics.sql",
    // Visits/appointments
    "v2_appointments.sql",
    "v_visits_unified.sql",
];

/// Ordered list of view files to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewManifest {
    entries: Vec<String>,
}

impl Default for ViewManifest {
    fn default() -> Self {
        Self {
            entries: DEFAULT_DEPLOY_ORDER.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl ViewManifest {
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Restrict the manifest to the named files, preserving manifest
    /// order. Names not present in the manifest are returned so the
    /// caller can warn about them.
    pub fn filtered(&self, only: &[String]) -> (Self, Vec<String>) {
        let kept = self
            .entries
            .iter()
            .filter(|entry| only.iter().any(|name| name == *entry))
            .cloned()
            .collect::<Vec<_>>();

        let unknown = only
            .iter()
            .filter(|name| !self.entries.iter().any(|entry| entry == *name))
            .cloned()
            .collect();

        (Self { entries: kept }, unknown)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve manifest entries against a views directory, splitting
    /// them into files that exist and names that are missing on disk.
    pub fn resolve(&self, views_dir: &Path) -> ResolvedManifest {
        let mut present = Vec::new();
        let mut missing = Vec::new();

        for entry in &self.entries {
            let path = views_dir.join(entry);
            if path.is_file() {
                present.push(ViewFile::new(path));
            } else {
                missing.push(entry.clone());
            }
        }

        ResolvedManifest { present, missing }
    }
}

/// Manifest entries split by on-disk presence.
#[derive(Debug)]
pub struct ResolvedManifest {
    pub present: Vec<ViewFile>,
    pub missing: Vec<String>,
}

impl ResolvedManifest {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.present.iter().map(|f| f.path().to_path_buf()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_manifest_keeps_reference_views_first() {
        let manifest = ViewManifest::default();

        assert_eq!(manifest.len(), 21);
        assert_eq!(manifest.entries()[0], "v_oid_reference.sql");
        assert_eq!(manifest.entries()[1], "v_patient_demographics.sql");
        assert_eq!(manifest.entries()[20], "v_visits_unified.sql");
    }

    #[test]
    fn filtered_preserves_manifest_order_and_reports_unknown_names() {
        let manifest = ViewManifest::default();
        let only = vec![
            String::from("v_visits_unified.sql"),
            String::from("v_encounters.sql"),
            String::from("not_a_view.sql"),
        ];

        let (filtered, unknown) = manifest.filtered(&only);

        assert_eq!(
            filtered.entries(),
            ["v_encounters.sql", "v_visits_unified.sql"]
        );
        assert_eq!(unknown, ["not_a_view.sql"]);
    }

    #[test]
    fn resolve_splits_present_and_missing() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.sql"), "CREATE OR REPLACE VIEW a AS SELECT 1")
            .expect("write");

        let manifest = ViewManifest::from_entries(vec![
            String::from("a.sql"),
            String::from("b.sql"),
        ]);
        let resolved = manifest.resolve(dir.path());

        assert_eq!(resolved.present.len(), 1);
        assert_eq!(resolved.present[0].file_name(), "a.sql");
        assert_eq!(resolved.missing, ["b.sql"]);
    }
}
