//! Single point-in-time backend lookups.
//!
//! A lookup walks every page of one list call and classifies the answer as
//! [`Lookup::Found`], [`Lookup::Empty`] or an error. Empty and error are kept
//! apart: only an empty answer proves the backend has no data.

use std::future::Future;

use opsprobe_core::CallContext;
use opsprobe_core::constants::MAX_BACKEND_PAGES;
use tracing::debug;

use crate::api::LoggingApi;
use crate::api::MetricsApi;
use crate::api::TimeSeriesQuery;
use crate::api::TraceApi;
use crate::api::TraceQuery;
use crate::error::QueryError;
use crate::error::Result;
use crate::types::LogEntry;
use crate::types::Page;
use crate::types::TimeSeries;
use crate::types::Trace;

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// At least one matching item.
    Found(Vec<T>),
    /// The query succeeded and matched nothing.
    Empty,
}

impl<T> Lookup<T> {
    pub fn from_items(items: Vec<T>) -> Self {
        if items.is_empty() { Lookup::Empty } else { Lookup::Found(items) }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Lookup::Found(items) => items.len(),
            Lookup::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walk pages until `keep` says stop or the listing ends.
///
/// `keep` receives each page's items and returns false to stop early.
async fn walk_pages<T, F, Fut, K>(what: &str, mut fetch: F, mut keep: K) -> Result<()>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
    K: FnMut(Vec<T>) -> bool,
{
    let mut token: Option<String> = None;
    for page in 1..=MAX_BACKEND_PAGES {
        let Page { items, next_page_token } = fetch(token.take()).await?;
        debug!(what, page, items = items.len(), more = next_page_token.is_some(), "fetched page");
        if !keep(items) {
            return Ok(());
        }
        match next_page_token {
            Some(next) => token = Some(next),
            None => return Ok(()),
        }
    }
    Err(QueryError::TooManyPages {
        what: what.to_string(),
        pages: MAX_BACKEND_PAGES,
    })
}

/// All non-empty time series matching `query`.
///
/// Series without points are skipped. When some but fewer than `minimum`
/// series carry points the result is [`QueryError::InvalidIteratorLength`],
/// which callers treat as inconclusive rather than empty.
pub async fn lookup_metric_series(
    api: &dyn MetricsApi,
    ctx: &CallContext,
    query: &TimeSeriesQuery,
    minimum: usize,
) -> Result<Lookup<TimeSeries>> {
    if minimum < 1 {
        return Err(QueryError::InvalidMinimum { minimum });
    }

    let mut series = Vec::new();
    walk_pages(
        "list time series",
        |token| async move { api.list_time_series(ctx, query, token.as_deref()).await },
        |items| {
            series.extend(items.into_iter().filter(|s| !s.points.is_empty()));
            true
        },
    )
    .await?;

    if series.is_empty() {
        return Ok(Lookup::Empty);
    }
    if series.len() < minimum {
        return Err(QueryError::InvalidIteratorLength {
            found: series.len(),
            minimum,
        });
    }
    Ok(Lookup::Found(series))
}

/// Every log entry matching `filter`.
pub async fn lookup_logs(api: &dyn LoggingApi, ctx: &CallContext, filter: &str) -> Result<Lookup<LogEntry>> {
    let mut entries = Vec::new();
    walk_pages(
        "list log entries",
        |token| async move { api.list_entries(ctx, filter, token.as_deref()).await },
        |items| {
            entries.extend(items);
            true
        },
    )
    .await?;
    for entry in &entries {
        debug!(log_name = %entry.log_name, insert_id = ?entry.insert_id, "found matching log entry");
    }
    Ok(Lookup::from_items(entries))
}

/// The first trace matching `query`, or `None` when there is none.
pub async fn first_trace(api: &dyn TraceApi, ctx: &CallContext, query: &TraceQuery) -> Result<Option<Trace>> {
    let mut first = None;
    walk_pages(
        "list traces",
        |token| async move { api.list_traces(ctx, query, token.as_deref()).await },
        |items| {
            first = items.into_iter().next();
            first.is_none()
        },
    )
    .await?;
    Ok(first)
}
