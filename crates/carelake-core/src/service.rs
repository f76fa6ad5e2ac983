//! Query-service contract and its adapters.
//!
//! `QueryService` is the seam between the orchestration engines and
//! the cloud query API: the production `AthenaAdapter` speaks the
//! AWS-JSON-1.1 protocol over an `HttpClient`, while
//! `MockQueryService` replays scripted states and canned results for
//! tests and `--mock` runs.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::athena::{
    GetQueryExecutionInput, GetQueryExecutionOutput, GetQueryResultsInput, GetQueryResultsOutput,
    QueryState, ResultSet, StartQueryExecutionInput, StartQueryExecutionOutput,
    QueryExecutionContext, ResultConfiguration,
};
use crate::config::ServiceConfig;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::retry::RetryConfig;

/// Service-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidRequest,
    Unavailable,
    RateLimited,
    Internal,
}

/// Structured error returned by query-service operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    kind: ServiceErrorKind,
    message: String,
    retryable: bool,
}

impl ServiceError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ServiceErrorKind::InvalidRequest => "service.invalid_request",
            ServiceErrorKind::Unavailable => "service.unavailable",
            ServiceErrorKind::RateLimited => "service.rate_limited",
            ServiceErrorKind::Internal => "service.internal",
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ServiceError {}

/// A query submission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartQuery {
    pub sql: String,
    pub database: String,
}

impl StartQuery {
    pub fn new(sql: impl Into<String>, database: impl Into<String>) -> Result<Self, ServiceError> {
        let sql = sql.into();
        let database = database.into();

        if sql.trim().is_empty() {
            return Err(ServiceError::invalid_request("query string must not be empty"));
        }
        if database.trim().is_empty() {
            return Err(ServiceError::invalid_request("database must not be empty"));
        }

        Ok(Self { sql, database })
    }
}

/// Identifier of a submitted query execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle(String);

impl QueryHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QueryHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution status snapshot from a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    pub reason: Option<String>,
}

impl QueryStatus {
    pub fn new(state: QueryState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn with_reason(state: QueryState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: Some(reason.into()),
        }
    }
}

/// Asynchronous query execution contract.
pub trait QueryService: Send + Sync {
    fn start_query<'a>(
        &'a self,
        request: StartQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryHandle, ServiceError>> + Send + 'a>>;

    fn execution_status<'a>(
        &'a self,
        handle: &'a QueryHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueryStatus, ServiceError>> + Send + 'a>>;

    fn fetch_results<'a>(
        &'a self,
        handle: &'a QueryHandle,
        max_rows: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ResultSet, ServiceError>> + Send + 'a>>;

    /// Whether this service is a test double.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Production adapter speaking the service's AWS-JSON-1.1 protocol.
pub struct AthenaAdapter {
    http_client: Arc<dyn HttpClient>,
    endpoint: String,
    auth: HttpAuth,
    output_location: Option<String>,
    retry: RetryConfig,
}

/// Error body shape for AWS-JSON error responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(rename = "message", alias = "Message", default)]
    message: Option<String>,
}

impl AthenaAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, region: &str, auth: HttpAuth) -> Self {
        Self {
            http_client,
            endpoint: format!("https://athena.{region}.amazonaws.com/"),
            auth,
            output_location: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(config: &ServiceConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let adapter = Self::new(http_client, &config.region, config.auth.clone());
        match &config.output_location {
            Some(location) => adapter.with_output_location(location.clone()),
            None => adapter,
        }
    }

    pub fn with_output_location(mut self, output_location: impl Into<String>) -> Self {
        self.output_location = Some(output_location.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn call<R: DeserializeOwned>(
        &self,
        target: &str,
        body: String,
    ) -> Result<R, ServiceError> {
        let mut attempt: u32 = 0;

        loop {
            let request = HttpRequest::post(&self.endpoint)
                .with_header("content-type", "application/x-amz-json-1.1")
                .with_header("x-amz-target", target)
                .with_auth(&self.auth)
                .with_body(body.clone());

            let may_retry = self.retry.enabled && attempt < self.retry.max_retries;

            match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => {
                    return serde_json::from_str(&response.body).map_err(|e| {
                        ServiceError::internal(format!(
                            "failed to parse {target} response: {e}"
                        ))
                    });
                }
                Ok(response) => {
                    if may_retry && self.retry.should_retry_status(response.status) {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_api_error(target, response.status, &response.body));
                }
                Err(error) => {
                    if may_retry && self.retry.should_retry_transport(&error) {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ServiceError::unavailable(format!(
                        "{target} transport error: {}",
                        error.message()
                    )));
                }
            }
        }
    }
}

fn classify_api_error(target: &str, status: u16, body: &str) -> ServiceError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or(ApiErrorBody {
        error_type: None,
        message: None,
    });

    let detail = parsed
        .message
        .unwrap_or_else(|| format!("status {status}"));
    let error_type = parsed.error_type.unwrap_or_default();

    if error_type.contains("Throttling") || error_type.contains("TooManyRequests") {
        ServiceError::rate_limited(format!("{target} throttled: {detail}"))
    } else if error_type.contains("InvalidRequest") {
        ServiceError::invalid_request(format!("{target} rejected: {detail}"))
    } else if status >= 500 {
        ServiceError::unavailable(format!("{target} unavailable: {detail}"))
    } else {
        ServiceError::internal(format!("{target} failed with status {status}: {detail}"))
    }
}

impl QueryService for AthenaAdapter {
    fn start_query<'a>(
        &'a self,
        request: StartQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryHandle, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            // Serialized once so retries reuse the idempotency token.
            let input = StartQueryExecutionInput {
                query_string: &request.sql,
                query_execution_context: QueryExecutionContext {
                    database: &request.database,
                },
                result_configuration: self
                    .output_location
                    .as_deref()
                    .map(|output_location| ResultConfiguration { output_location }),
                client_request_token: Uuid::new_v4().to_string(),
            };
            let body = serde_json::to_string(&input)
                .map_err(|e| ServiceError::internal(format!("failed to encode request: {e}")))?;

            let output: StartQueryExecutionOutput = self
                .call("AmazonAthena.StartQueryExecution", body)
                .await?;

            Ok(QueryHandle::new(output.query_execution_id))
        })
    }

    fn execution_status<'a>(
        &'a self,
        handle: &'a QueryHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueryStatus, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let input = GetQueryExecutionInput {
                query_execution_id: handle.as_str(),
            };
            let body = serde_json::to_string(&input)
                .map_err(|e| ServiceError::internal(format!("failed to encode request: {e}")))?;

            let output: GetQueryExecutionOutput =
                self.call("AmazonAthena.GetQueryExecution", body).await?;

            let status = output.query_execution.status;
            Ok(QueryStatus {
                state: status.state,
                reason: status.state_change_reason,
            })
        })
    }

    fn fetch_results<'a>(
        &'a self,
        handle: &'a QueryHandle,
        max_rows: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ResultSet, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let input = GetQueryResultsInput {
                query_execution_id: handle.as_str(),
                max_results: Some(max_rows),
            };
            let body = serde_json::to_string(&input)
                .map_err(|e| ServiceError::internal(format!("failed to encode request: {e}")))?;

            let output: GetQueryResultsOutput =
                self.call("AmazonAthena.GetQueryResults", body).await?;

            Ok(output.result_set)
        })
    }
}

/// Scripted in-memory service for tests and `--mock` runs.
///
/// Each started query walks a configurable state script (default:
/// Running, then Succeeded) and serves a canned result set selected
/// by substring match on the submitted SQL.
pub struct MockQueryService {
    state: Mutex<MockState>,
}

struct MockState {
    next_id: u64,
    script: Vec<QueryState>,
    failures: Vec<(String, String)>,
    results: Vec<(String, ResultSet)>,
    queries: HashMap<String, MockQuery>,
    submitted: Vec<String>,
}

struct MockQuery {
    statuses: Vec<QueryStatus>,
    polls: usize,
    result: ResultSet,
}

impl Default for MockQueryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQueryService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                script: vec![QueryState::Running, QueryState::Succeeded],
                failures: Vec::new(),
                results: Vec::new(),
                queries: HashMap::new(),
                submitted: Vec::new(),
            }),
        }
    }

    /// State sequence walked by subsequently started queries. The last
    /// state repeats on further polls.
    pub fn with_script(self, script: Vec<QueryState>) -> Self {
        self.lock().script = script;
        self
    }

    /// Queries whose SQL contains `needle` fail with `reason`.
    pub fn fail_matching(self, needle: impl Into<String>, reason: impl Into<String>) -> Self {
        self.lock().failures.push((needle.into(), reason.into()));
        self
    }

    /// Queries whose SQL contains `needle` return this result set.
    pub fn respond_with(self, needle: impl Into<String>, result: ResultSet) -> Self {
        self.lock().results.push((needle.into(), result));
        self
    }

    /// SQL texts submitted so far, in order.
    pub fn submitted_queries(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state should not be poisoned")
    }
}

impl QueryService for MockQueryService {
    fn start_query<'a>(
        &'a self,
        request: StartQuery,
    ) -> Pin<Box<dyn Future<Output = Result<QueryHandle, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.lock();

            let id = format!("mock-query-{}", state.next_id);
            state.next_id += 1;

            let failure = state
                .failures
                .iter()
                .find(|(needle, _)| request.sql.contains(needle))
                .map(|(_, reason)| reason.clone());

            let statuses = match failure {
                Some(reason) => vec![
                    QueryStatus::new(QueryState::Running),
                    QueryStatus::with_reason(QueryState::Failed, reason),
                ],
                None => state
                    .script
                    .iter()
                    .map(|s| QueryStatus::new(*s))
                    .collect(),
            };

            let result = state
                .results
                .iter()
                .find(|(needle, _)| request.sql.contains(needle))
                .map(|(_, result)| result.clone())
                .unwrap_or_default();

            state.submitted.push(request.sql);
            state.queries.insert(
                id.clone(),
                MockQuery {
                    statuses,
                    polls: 0,
                    result,
                },
            );

            Ok(QueryHandle::new(id))
        })
    }

    fn execution_status<'a>(
        &'a self,
        handle: &'a QueryHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueryStatus, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.lock();
            let query = state.queries.get_mut(handle.as_str()).ok_or_else(|| {
                ServiceError::invalid_request(format!("unknown query execution '{handle}'"))
            })?;

            let index = query.polls.min(query.statuses.len().saturating_sub(1));
            query.polls += 1;
            Ok(query.statuses[index].clone())
        })
    }

    fn fetch_results<'a>(
        &'a self,
        handle: &'a QueryHandle,
        _max_rows: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ResultSet, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.lock();
            let query = state.queries.get(handle.as_str()).ok_or_else(|| {
                ServiceError::invalid_request(format!("unknown query execution '{handle}'"))
            })?;
            Ok(query.result.clone())
        })
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use std::sync::Mutex as StdMutex;

    struct ScriptedHttpClient {
        responses: StdMutex<Vec<Result<HttpResponse, HttpError>>>,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttpClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                requests: StdMutex::new(Vec::new()),
            }
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let mut responses = self
                .responses
                .lock()
                .expect("response store should not be poisoned");
            let response = if responses.is_empty() {
                Ok(HttpResponse::ok_json("{}"))
            } else {
                responses.remove(0)
            };
            Box::pin(async move { response })
        }

        fn is_mock(&self) -> bool {
            true
        }
    }

    fn start_request() -> StartQuery {
        StartQuery::new("CREATE OR REPLACE VIEW v AS SELECT 1", "fhir_prd_db")
            .expect("valid request")
    }

    #[test]
    fn start_query_rejects_empty_sql() {
        let error = StartQuery::new("   ", "fhir_prd_db").expect_err("must reject");
        assert_eq!(error.kind(), ServiceErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn adapter_posts_json_protocol_headers() {
        let client = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::ok_json(
            r#"{"QueryExecutionId": "abc-123"}"#,
        ))]));
        let adapter = AthenaAdapter::new(client.clone(), "us-east-1", HttpAuth::None)
            .with_output_location("s3://results/");

        let handle = adapter
            .start_query(start_request())
            .await
            .expect("start should succeed");
        assert_eq!(handle.as_str(), "abc-123");

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://athena.us-east-1.amazonaws.com/");
        assert_eq!(
            requests[0].headers.get("x-amz-target").map(String::as_str),
            Some("AmazonAthena.StartQueryExecution")
        );
        assert_eq!(
            requests[0].headers.get("content-type").map(String::as_str),
            Some("application/x-amz-json-1.1")
        );

        let body = requests[0].body.as_deref().expect("body present");
        assert!(body.contains("\"Database\":\"fhir_prd_db\""));
        assert!(body.contains("\"OutputLocation\":\"s3://results/\""));
    }

    #[tokio::test]
    async fn adapter_retries_throttled_submissions() {
        let throttled = HttpResponse {
            status: 429,
            body: String::from(r#"{"__type": "ThrottlingException", "message": "slow down"}"#),
        };
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Ok(throttled),
            Ok(HttpResponse::ok_json(r#"{"QueryExecutionId": "abc-456"}"#)),
        ]));
        let adapter = AthenaAdapter::new(client.clone(), "us-east-1", HttpAuth::None)
            .with_retry(RetryConfig::fixed(std::time::Duration::ZERO, 2));

        let handle = adapter
            .start_query(start_request())
            .await
            .expect("retry should recover");

        assert_eq!(handle.as_str(), "abc-456");
        assert_eq!(client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn adapter_retries_connect_failures() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Err(HttpError::connect("connection refused")),
            Ok(HttpResponse::ok_json(r#"{"QueryExecutionId": "abc-789"}"#)),
        ]));
        let adapter = AthenaAdapter::new(client.clone(), "us-east-1", HttpAuth::None)
            .with_retry(RetryConfig::fixed(std::time::Duration::ZERO, 2));

        let handle = adapter
            .start_query(start_request())
            .await
            .expect("retry should recover");

        assert_eq!(handle.as_str(), "abc-789");
        assert_eq!(client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn adapter_skips_timeout_retries_when_disabled() {
        let client = Arc::new(ScriptedHttpClient::new(vec![
            Err(HttpError::timeout("deadline exceeded")),
            Ok(HttpResponse::ok_json(r#"{"QueryExecutionId": "abc-999"}"#)),
        ]));
        let retry = RetryConfig {
            retry_on_timeout: false,
            ..RetryConfig::fixed(std::time::Duration::ZERO, 2)
        };
        let adapter =
            AthenaAdapter::new(client.clone(), "us-east-1", HttpAuth::None).with_retry(retry);

        let error = adapter
            .start_query(start_request())
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), ServiceErrorKind::Unavailable);
        assert_eq!(client.recorded_requests().len(), 1, "timeout must not retry");
    }

    #[tokio::test]
    async fn adapter_classifies_throttling_when_retries_exhausted() {
        let throttled = HttpResponse {
            status: 429,
            body: String::from(r#"{"__type": "ThrottlingException", "message": "slow down"}"#),
        };
        let client = Arc::new(ScriptedHttpClient::new(vec![Ok(throttled)]));
        let adapter = AthenaAdapter::new(client, "us-east-1", HttpAuth::None)
            .with_retry(RetryConfig::no_retry());

        let error = adapter
            .start_query(start_request())
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), ServiceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn adapter_classifies_invalid_request_without_retry() {
        let rejected = HttpResponse {
            status: 400,
            body: String::from(
                r#"{"__type": "InvalidRequestException", "message": "no such database"}"#,
            ),
        };
        let client = Arc::new(ScriptedHttpClient::new(vec![Ok(rejected)]));
        let adapter = AthenaAdapter::new(client.clone(), "us-east-1", HttpAuth::None);

        let error = adapter
            .start_query(start_request())
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), ServiceErrorKind::InvalidRequest);
        assert!(error.message().contains("no such database"));
        assert_eq!(client.recorded_requests().len(), 1, "400 must not retry");
    }

    #[tokio::test]
    async fn mock_walks_state_script_then_repeats_terminal_state() {
        let service = MockQueryService::new();
        let handle = service
            .start_query(start_request())
            .await
            .expect("start should succeed");

        let first = service.execution_status(&handle).await.expect("status");
        assert_eq!(first.state, QueryState::Running);

        let second = service.execution_status(&handle).await.expect("status");
        assert_eq!(second.state, QueryState::Succeeded);

        let third = service.execution_status(&handle).await.expect("status");
        assert_eq!(third.state, QueryState::Succeeded);
    }

    #[tokio::test]
    async fn mock_fails_matching_queries_with_reason() {
        let service = MockQueryService::new()
            .fail_matching("v_broken", "SYNTAX_ERROR: line 3");

        let request = StartQuery::new("CREATE OR REPLACE VIEW v_broken AS SELECT", "db")
            .expect("valid request");
        let handle = service.start_query(request).await.expect("start");

        let _ = service.execution_status(&handle).await.expect("running");
        let terminal = service.execution_status(&handle).await.expect("failed");

        assert_eq!(terminal.state, QueryState::Failed);
        assert_eq!(terminal.reason.as_deref(), Some("SYNTAX_ERROR: line 3"));
    }

    #[tokio::test]
    async fn mock_serves_canned_results_by_sql_substring() {
        let result = ResultSet::from_rows(&["pd_birth_date"], &[vec![Some("2005-03-14")]]);
        let service = MockQueryService::new().respond_with("v_patient_demographics", result);

        let request = StartQuery::new("SELECT pd_birth_date FROM v_patient_demographics", "db")
            .expect("valid request");
        let handle = service.start_query(request).await.expect("start");

        let fetched = service.fetch_results(&handle, 10).await.expect("results");
        assert_eq!(fetched.data_rows()[0].cell(0), Some("2005-03-14"));

        assert_eq!(service.submitted_queries().len(), 1);
    }
}
