//! Error types for telemetry backend queries.

use opsprobe_core::DoneReason;
use opsprobe_core::ErrorClass;
use opsprobe_core::RpcCode;
use opsprobe_core::verified::classify::classify_lookup_code;
use opsprobe_exec::ExecError;
use snafu::Snafu;

/// Result type for backend queries.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Errors from querying metrics, logs and traces.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)] // Snafu errors are documented via display attributes
pub enum QueryError {
    /// The backend answered with an error status.
    #[snafu(display("backend returned {code:?} (HTTP {status}): {message}"))]
    Api { code: RpcCode, status: u16, message: String },

    #[snafu(display("backend request failed: {source}"))]
    Transport { source: reqwest::Error },

    #[snafu(display("failed to decode backend response: {source}"))]
    Decode { source: reqwest::Error },

    #[snafu(display("failed to authenticate backend request: {source}"))]
    Auth { source: ExecError },

    #[snafu(display("invalid backend URL: {source}"))]
    Url { source: url::ParseError },

    #[snafu(display("backend query stopped: {reason}"))]
    Interrupted { reason: DoneReason },

    /// Data exists, but fewer series than required. Inconclusive, unlike an
    /// empty result.
    #[snafu(display("found {found} non-empty time series, need at least {minimum}"))]
    InvalidIteratorLength { found: usize, minimum: usize },

    /// Callers must ask for at least one series.
    #[snafu(display("minimum required series must be at least 1, got {minimum}"))]
    InvalidMinimum { minimum: usize },

    /// A log query needs at least one attempt.
    #[snafu(display("max attempts must be at least 1, got {max_attempts}"))]
    InvalidMaxAttempts { max_attempts: u32 },

    /// The query succeeded but matched nothing yet.
    #[snafu(display("no matching data yet"))]
    NoData,

    #[snafu(display("{what} returned more than {pages} pages"))]
    TooManyPages { what: String, pages: u32 },

    #[snafu(display("{what}: {source}"))]
    Query {
        what: String,
        #[snafu(source(from(QueryError, Box::new)))]
        source: Box<QueryError>,
    },

    #[snafu(display("{what} failed: exhausted retries after {attempts} attempts (last: {last})"))]
    ExhaustedRetries {
        what: String,
        attempts: u32,
        last: Box<QueryError>,
    },

    #[snafu(display("{what} failed: unexpectedly found {count} matching items"))]
    UnexpectedlyFound { what: String, count: usize },

    #[snafu(display("{what} failed: no successful queries to the backend in {attempts} attempts"))]
    NoSuccessfulQueries { what: String, attempts: u32 },

    #[snafu(display(
        "{what} failed: {not_found} of {attempts} queries returned NOT_FOUND, at least one failed with another error"
    ))]
    MixedQueryFailures {
        what: String,
        not_found: u32,
        attempts: u32,
    },
}

impl QueryError {
    /// Status code reported by the backend, looking through context.
    pub fn code(&self) -> Option<RpcCode> {
        match self {
            QueryError::Api { code, .. } => Some(*code),
            QueryError::Query { source, .. } => source.code(),
            _ => None,
        }
    }

    /// True when a waiter ran out of attempts without a conclusive answer.
    pub fn is_exhausted_retries(&self) -> bool {
        match self {
            QueryError::ExhaustedRetries { .. } => true,
            QueryError::Query { source, .. } => source.is_exhausted_retries(),
            _ => false,
        }
    }

    /// Classification used by metric and trace lookups.
    pub fn lookup_class(&self) -> ErrorClass {
        match self {
            QueryError::NoData | QueryError::InvalidIteratorLength { .. } => ErrorClass::Retriable,
            QueryError::Api { code, .. } => classify_lookup_code(*code),
            QueryError::Query { source, .. } => source.lookup_class(),
            _ => ErrorClass::Permanent,
        }
    }
}
