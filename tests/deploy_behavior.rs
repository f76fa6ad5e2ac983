//! Behavior-driven tests for view deployment
//!
//! These tests verify WHAT an operator can accomplish with the deploy
//! engine, focusing on observable behavior rather than implementation
//! details.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use carelake_core::{
    DeployStatus, Deployer, MockQueryService, PollConfig, QueryState, ViewManifest,
    DEFAULT_DEPLOY_ORDER,
};
use tempfile::tempdir;

fn write_view(dir: &Path, file: &str) {
    let view = file.trim_end_matches(".sql");
    let sql = format!(
        "CREATE OR REPLACE VIEW {view} AS\nSELECT\n    pa.id as patient_fhir_id\nFROM patient_access pa"
    );
    fs::write(dir.join(file), sql).expect("fixture write should succeed");
}

fn fast_deployer(service: Arc<MockQueryService>) -> Deployer {
    Deployer::new(service, "fhir_prd_db").with_poll(PollConfig::immediate(10))
}

// =============================================================================
// Deployment Journey: Full Manifest
// =============================================================================

#[tokio::test]
async fn operator_can_deploy_the_full_view_set_in_dependency_order() {
    // Given: A views directory holding every manifest file
    let dir = tempdir().expect("tempdir");
    for file in DEFAULT_DEPLOY_ORDER {
        write_view(dir.path(), file);
    }
    let service = Arc::new(MockQueryService::new());

    // When: They deploy the default manifest
    let report = fast_deployer(service.clone())
        .deploy_manifest(dir.path(), &ViewManifest::default())
        .await;

    // Then: Every view deploys, one at a time, in manifest order
    assert_eq!(report.deployed(), 21);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.skipped(), 0);
    assert!(report.is_clean());

    let submitted = service.submitted_queries();
    assert_eq!(submitted.len(), 21);
    assert!(submitted[0].contains("VIEW v_oid_reference "));
    assert!(submitted[20].contains("VIEW v_visits_unified "));
}

#[tokio::test]
async fn reference_views_deploy_before_the_views_that_read_them() {
    let manifest = ViewManifest::default();
    let entries = manifest.entries();

    let position = |name: &str| {
        entries
            .iter()
            .position(|e| e == name)
            .unwrap_or_else(|| panic!("{name} must be in the manifest"))
    };

    // Demographics feeds nearly everything downstream
    assert!(position("v_patient_demographics.sql") < position("v_encounters.sql"));
    // Radiation enrichment reads the episode view
    assert!(
        position("v2_radiation_treatment_episodes.sql")
            < position("v2_radiation_episode_enrichment.sql")
    );
    // Unified visits reads appointments
    assert!(position("v2_appointments.sql") < position("v_visits_unified.sql"));
}

// =============================================================================
// Deployment Journey: Partial Directories and Failures
// =============================================================================

#[tokio::test]
async fn missing_files_are_skipped_and_the_rest_still_deploy() {
    // Given: A directory with only two of the manifest files
    let dir = tempdir().expect("tempdir");
    write_view(dir.path(), "v_patient_demographics.sql");
    write_view(dir.path(), "v_encounters.sql");
    let service = Arc::new(MockQueryService::new());

    // When: They deploy the default manifest anyway
    let report = fast_deployer(service.clone())
        .deploy_manifest(dir.path(), &ViewManifest::default())
        .await;

    // Then: The two present views deploy and the rest are skips, not failures
    assert_eq!(report.deployed(), 2);
    assert_eq!(report.skipped(), 19);
    assert!(report.is_clean());
    assert_eq!(service.submitted_queries().len(), 2);
}

#[tokio::test]
async fn one_broken_view_never_blocks_the_views_behind_it() {
    // Given: The first view in line has a syntax error the service rejects
    let dir = tempdir().expect("tempdir");
    write_view(dir.path(), "v_oid_reference.sql");
    write_view(dir.path(), "v_patient_demographics.sql");
    let service = Arc::new(
        MockQueryService::new().fail_matching("v_oid_reference", "SYNTAX_ERROR: line 12"),
    );

    let manifest = ViewManifest::from_entries(vec![
        String::from("v_oid_reference.sql"),
        String::from("v_patient_demographics.sql"),
    ]);

    // When: They deploy both
    let report = fast_deployer(service).deploy_manifest(dir.path(), &manifest).await;

    // Then: The failure is recorded with the service's reason and the
    // second view still deployed
    assert_eq!(report.failed(), 1);
    assert_eq!(report.deployed(), 1);
    assert!(!report.is_clean());

    let failure = report.failures().next().expect("one failure");
    assert_eq!(failure.view, "v_oid_reference");
    assert_eq!(
        failure.status,
        DeployStatus::Failed {
            reason: String::from("SYNTAX_ERROR: line 12")
        }
    );
}

#[tokio::test]
async fn failure_without_a_reason_reports_unknown() {
    // Given: The service reports FAILED with no state change reason
    let dir = tempdir().expect("tempdir");
    write_view(dir.path(), "v_diagnoses.sql");
    let service = Arc::new(MockQueryService::new().with_script(vec![QueryState::Failed]));

    let manifest = ViewManifest::from_entries(vec![String::from("v_diagnoses.sql")]);

    // When: The deploy runs
    let report = fast_deployer(service).deploy_manifest(dir.path(), &manifest).await;

    // Then: The record carries the conventional "Unknown" reason
    assert_eq!(
        report.records[0].status,
        DeployStatus::Failed {
            reason: String::from("Unknown")
        }
    );
}

#[tokio::test]
async fn a_query_stuck_running_is_reported_as_timed_out() {
    // Given: A view whose execution never leaves RUNNING
    let dir = tempdir().expect("tempdir");
    write_view(dir.path(), "v_binary_files.sql");
    let service = Arc::new(MockQueryService::new().with_script(vec![QueryState::Running]));

    let manifest = ViewManifest::from_entries(vec![String::from("v_binary_files.sql")]);

    // When: The deploy runs with a small poll budget
    let report = Deployer::new(service, "fhir_prd_db")
        .with_poll(PollConfig::immediate(3))
        .deploy_manifest(dir.path(), &manifest)
        .await;

    // Then: The view counts as failed with the attempt budget recorded
    assert_eq!(report.failed(), 1);
    assert_eq!(report.records[0].status, DeployStatus::TimedOut { attempts: 3 });
}

#[tokio::test]
async fn empty_manifest_yields_an_empty_clean_report() {
    let dir = tempdir().expect("tempdir");
    let service = Arc::new(MockQueryService::new());

    let report = fast_deployer(service)
        .deploy_manifest(dir.path(), &ViewManifest::from_entries(Vec::new()))
        .await;

    assert!(report.records.is_empty());
    assert!(report.is_clean());
}

// =============================================================================
// Deployment Journey: Subset Selection
// =============================================================================

#[tokio::test]
async fn filtered_manifest_keeps_dependency_order_for_the_subset() {
    // Given: An operator redeploying two views named out of order
    let dir = tempdir().expect("tempdir");
    write_view(dir.path(), "v_encounters.sql");
    write_view(dir.path(), "v_patient_demographics.sql");
    let service = Arc::new(MockQueryService::new());

    let (manifest, unknown) = ViewManifest::default().filtered(&[
        String::from("v_encounters.sql"),
        String::from("v_patient_demographics.sql"),
        String::from("v_not_real.sql"),
    ]);

    // When: They deploy the filtered manifest
    let report = fast_deployer(service.clone())
        .deploy_manifest(dir.path(), &manifest)
        .await;

    // Then: Demographics still deploys before encounters, and the
    // unknown name was surfaced rather than silently dropped
    assert_eq!(unknown, ["v_not_real.sql"]);
    assert_eq!(report.deployed(), 2);

    let submitted = service.submitted_queries();
    assert!(submitted[0].contains("v_patient_demographics"));
    assert!(submitted[1].contains("v_encounters"));
}
