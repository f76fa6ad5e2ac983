//! Core contracts for carelake.
//!
//! This crate contains:
//! - The query-service trait, its wire types, and the HTTP adapter
//! - The polling loop shared by deployment and validation
//! - The sequential view deployment engine
//! - Live-data validation probes
//! - Response envelope and configuration

pub mod athena;
pub mod config;
pub mod deploy;
pub mod envelope;
pub mod http_client;
pub mod poll;
pub mod retry;
pub mod service;
pub mod timestamp;
pub mod validate;

pub use athena::{
    ColumnInfo, Datum, QueryState, ResultSet, ResultSetMetadata, Row,
};
pub use carelake_sql::{
    apply_fixes, default_fixes, fix_file, scan_file, scan_sql, view_name, DateExpressionKind,
    DateFinding, DateFix, FileFixResult, FileFixes, FixOutcome, ResolvedManifest, ScanReport,
    SqlError, ViewFile, ViewManifest, DEFAULT_DEPLOY_ORDER,
};
pub use config::{ConfigError, ServiceConfig, DEFAULT_DATABASE, DEFAULT_REGION};
pub use deploy::{DeployReport, DeployStatus, Deployer, ViewDeployment};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta, SCHEMA_VERSION};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    NoopHttpClient, ReqwestHttpClient,
};
pub use poll::{
    run_to_completion, wait_for_completion, PollConfig, QueryOutcome, UNKNOWN_FAILURE_REASON,
};
pub use retry::{Backoff, RetryConfig};
pub use service::{
    AthenaAdapter, MockQueryService, QueryHandle, QueryService, QueryStatus, ServiceError,
    ServiceErrorKind, StartQuery,
};
pub use timestamp::{TimestampError, UtcDateTime};
pub use validate::{
    default_probes, ColumnNulls, ProbeOutcome, ProbeReport, ProbeSpec, ValidationReport, Validator,
    MAX_PROBE_COLUMNS,
};
