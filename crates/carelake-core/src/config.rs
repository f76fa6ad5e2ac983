//! Environment-driven service configuration.

use thiserror::Error;

use crate::http_client::HttpAuth;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_DATABASE: &str = "fhir_prd_db";

const REGION_VAR: &str = "CARELAKE_REGION";
const DATABASE_VAR: &str = "CARELAKE_DATABASE";
const OUTPUT_LOCATION_VAR: &str = "CARELAKE_OUTPUT_LOCATION";
const AUTH_HEADER_VAR: &str = "CARELAKE_AUTH_HEADER";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The auth header variable must look like `Name: value`.
    #[error("{AUTH_HEADER_VAR} must be formatted as 'Name: value', got '{value}'")]
    InvalidAuthHeader { value: String },

    #[error("no result staging location; set {OUTPUT_LOCATION_VAR} or pass --output-location")]
    MissingOutputLocation,
}

/// Connection settings for the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub region: String,
    pub database: String,
    /// Result staging location, such as `s3://bucket/prefix/`. Optional
    /// when the service's workgroup supplies one.
    pub output_location: Option<String>,
    pub auth: HttpAuth,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            region: String::from(DEFAULT_REGION),
            database: String::from(DEFAULT_DATABASE),
            output_location: None,
            auth: HttpAuth::None,
        }
    }
}

impl ServiceConfig {
    /// Reads settings from `CARELAKE_*` environment variables, falling
    /// back to defaults where unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(region) = non_empty_var(REGION_VAR) {
            config.region = region;
        }
        if let Some(database) = non_empty_var(DATABASE_VAR) {
            config.database = database;
        }
        config.output_location = non_empty_var(OUTPUT_LOCATION_VAR);

        if let Some(raw) = non_empty_var(AUTH_HEADER_VAR) {
            config.auth = parse_auth_header(&raw)?;
        }

        Ok(config)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Live runs must stage results somewhere.
    pub fn require_output_location(&self) -> Result<&str, ConfigError> {
        self.output_location
            .as_deref()
            .ok_or(ConfigError::MissingOutputLocation)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_auth_header(raw: &str) -> Result<HttpAuth, ConfigError> {
    let (name, value) = raw.split_once(':').ok_or_else(|| ConfigError::InvalidAuthHeader {
        value: raw.to_owned(),
    })?;

    let name = name.trim();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return Err(ConfigError::InvalidAuthHeader {
            value: raw.to_owned(),
        });
    }

    Ok(HttpAuth::Header {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}
