//! Paged read APIs of the telemetry backends.
//!
//! The traits are the seam between the waiters and the network: the REST
//! clients in [`google`] talk to the real services, tests plug in fakes.

pub mod google;
mod rest;

use async_trait::async_trait;
use opsprobe_core::CallContext;

use crate::error::Result;
use crate::types::LogEntry;
use crate::types::Page;
use crate::types::TimeSeries;
use crate::types::TimeWindow;
use crate::types::Trace;

/// A time series listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesQuery {
    pub project: String,
    pub filter: String,
    pub window: TimeWindow,
}

/// A trace listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQuery {
    pub project: String,
    pub filter: String,
    pub window: TimeWindow,
}

#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// One page of time series with full point data.
    async fn list_time_series(
        &self,
        ctx: &CallContext,
        query: &TimeSeriesQuery,
        page_token: Option<&str>,
    ) -> Result<Page<TimeSeries>>;
}

/// Log entries of the single project the client was created for.
#[async_trait]
pub trait LoggingApi: Send + Sync {
    async fn list_entries(&self, ctx: &CallContext, filter: &str, page_token: Option<&str>) -> Result<Page<LogEntry>>;
}

#[async_trait]
pub trait TraceApi: Send + Sync {
    async fn list_traces(&self, ctx: &CallContext, query: &TraceQuery, page_token: Option<&str>) -> Result<Page<Trace>>;
}
