//! REST clients for Cloud Monitoring, Cloud Logging and Cloud Trace.

use std::sync::Arc;

use async_trait::async_trait;
use opsprobe_core::CallContext;
use opsprobe_core::constants::BACKEND_PAGE_SIZE;
use opsprobe_exec::AccessTokenSource;
use serde::Deserialize;
use serde::Serialize;

use super::LoggingApi;
use super::MetricsApi;
use super::TimeSeriesQuery;
use super::TraceApi;
use super::TraceQuery;
use super::rest::RestClient;
use crate::error::Result;
use crate::types::LogEntry;
use crate::types::Page;
use crate::types::TimeSeries;
use crate::types::Trace;

pub const MONITORING_BASE_URL: &str = "https://monitoring.googleapis.com/";
pub const LOGGING_BASE_URL: &str = "https://logging.googleapis.com/";
pub const TRACE_BASE_URL: &str = "https://cloudtrace.googleapis.com/";

fn next_token(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

/// Cloud Monitoring `projects.timeSeries.list`.
#[derive(Clone)]
pub struct MonitoringClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    next_page_token: Option<String>,
}

impl MonitoringClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, MONITORING_BASE_URL)
    }

    pub fn with_base_url(tokens: Arc<dyn AccessTokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(tokens, base_url)?,
        })
    }
}

#[async_trait]
impl MetricsApi for MonitoringClient {
    async fn list_time_series(
        &self,
        ctx: &CallContext,
        query: &TimeSeriesQuery,
        page_token: Option<&str>,
    ) -> Result<Page<TimeSeries>> {
        let mut url = self.rest.url(&format!("v3/projects/{}/timeSeries", query.project))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("filter", &query.filter)
                .append_pair("interval.startTime", &query.window.start_rfc3339())
                .append_pair("interval.endTime", &query.window.end_rfc3339())
                .append_pair("view", "FULL")
                .append_pair("pageSize", &BACKEND_PAGE_SIZE.to_string());
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response: ListTimeSeriesResponse = self.rest.send_json(ctx, self.rest.get(url)).await?;
        Ok(Page {
            items: response.time_series,
            next_page_token: next_token(response.next_page_token),
        })
    }
}

/// Cloud Logging `entries.list`, bound to one project.
#[derive(Clone)]
pub struct LoggingClient {
    rest: RestClient,
    project: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesRequest<'a> {
    resource_names: Vec<String>,
    filter: &'a str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<LogEntry>,
    next_page_token: Option<String>,
}

impl LoggingClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>, project: impl Into<String>) -> Result<Self> {
        Self::with_base_url(tokens, project, LOGGING_BASE_URL)
    }

    pub fn with_base_url(
        tokens: Arc<dyn AccessTokenSource>,
        project: impl Into<String>,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(tokens, base_url)?,
            project: project.into(),
        })
    }
}

#[async_trait]
impl LoggingApi for LoggingClient {
    async fn list_entries(&self, ctx: &CallContext, filter: &str, page_token: Option<&str>) -> Result<Page<LogEntry>> {
        let url = self.rest.url("v2/entries:list")?;
        let body = ListEntriesRequest {
            resource_names: vec![format!("projects/{}", self.project)],
            filter,
            page_size: BACKEND_PAGE_SIZE,
            page_token,
        };
        let response: ListEntriesResponse = self.rest.send_json(ctx, self.rest.post(url).json(&body)).await?;
        Ok(Page {
            items: response.entries,
            next_page_token: next_token(response.next_page_token),
        })
    }
}

/// Cloud Trace v1 `projects.traces.list`.
#[derive(Clone)]
pub struct TraceClient {
    rest: RestClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTracesResponse {
    #[serde(default)]
    traces: Vec<Trace>,
    next_page_token: Option<String>,
}

impl TraceClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, TRACE_BASE_URL)
    }

    pub fn with_base_url(tokens: Arc<dyn AccessTokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(tokens, base_url)?,
        })
    }
}

#[async_trait]
impl TraceApi for TraceClient {
    async fn list_traces(&self, ctx: &CallContext, query: &TraceQuery, page_token: Option<&str>) -> Result<Page<Trace>> {
        let mut url = self.rest.url(&format!("v1/projects/{}/traces", query.project))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("filter", &query.filter)
                .append_pair("startTime", &query.window.start_rfc3339())
                .append_pair("endTime", &query.window.end_rfc3339())
                .append_pair("pageSize", &BACKEND_PAGE_SIZE.to_string());
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response: ListTracesResponse = self.rest.send_json(ctx, self.rest.get(url)).await?;
        Ok(Page {
            items: response.traces,
            next_page_token: next_token(response.next_page_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_request_shape() {
        let body = ListEntriesRequest {
            resource_names: vec!["projects/p".into()],
            filter: "logName=~\"x\"",
            page_size: 10,
            page_token: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"resourceNames": ["projects/p"], "filter": "logName=~\"x\"", "pageSize": 10})
        );
    }

    #[test]
    fn test_list_responses_tolerate_missing_fields() {
        let empty: ListTimeSeriesResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.time_series.is_empty());
        assert_eq!(next_token(empty.next_page_token), None);

        let traces: ListTracesResponse =
            serde_json::from_str(r#"{"traces":[{"projectId":"p","traceId":"abc"}],"nextPageToken":""}"#).unwrap();
        assert_eq!(traces.traces[0].trace_id, "abc");
        assert_eq!(next_token(traces.next_page_token), None);
    }
}
