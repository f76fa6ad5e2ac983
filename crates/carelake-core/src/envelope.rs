use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timestamp::UtcDateTime;

/// Standard response envelope for all machine-readable command outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn success(meta: EnvelopeMeta, data: T) -> Self {
        Self {
            meta,
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(meta: EnvelopeMeta, data: T, errors: Vec<EnvelopeError>) -> Self {
        Self { meta, data, errors }
    }

    pub fn push_error(&mut self, error: EnvelopeError) {
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    /// Database the command ran against, when it touched the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub const SCHEMA_VERSION: &str = "1.0";

impl EnvelopeMeta {
    pub fn new(latency_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            schema_version: String::from(SCHEMA_VERSION),
            generated_at: UtcDateTime::now(),
            database: None,
            latency_ms,
            warnings: Vec::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Structured error entry carried alongside envelope data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    /// What the error refers to, such as a view name or file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl EnvelopeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}
