//! Shared backend clients.
//!
//! Metrics and trace clients are project-agnostic and created once. Logging
//! clients are bound to a project and created lazily on first use, then
//! reused for every VM in that project.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use opsprobe_exec::AccessTokenSource;
use parking_lot::Mutex;
use tracing::debug;

use crate::api::LoggingApi;
use crate::api::MetricsApi;
use crate::api::TraceApi;
use crate::api::google::LoggingClient;
use crate::api::google::MonitoringClient;
use crate::api::google::TraceClient;
use crate::error::Result;

/// Builds the logging client for one project.
pub type LogClientFactory = dyn Fn(&str) -> Result<Arc<dyn LoggingApi>> + Send + Sync;

pub struct BackendRegistry {
    metrics: Arc<dyn MetricsApi>,
    traces: Arc<dyn TraceApi>,
    log_factory: Box<LogClientFactory>,
    log_clients: Mutex<HashMap<String, Arc<dyn LoggingApi>>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("log_projects", &self.log_clients.lock().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl BackendRegistry {
    pub fn new<F>(metrics: Arc<dyn MetricsApi>, traces: Arc<dyn TraceApi>, log_factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn LoggingApi>> + Send + Sync + 'static,
    {
        Self {
            metrics,
            traces,
            log_factory: Box::new(log_factory),
            log_clients: Mutex::new(HashMap::new()),
        }
    }

    /// Registry talking to the public Google APIs with `tokens`.
    pub fn google(tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        let metrics = Arc::new(MonitoringClient::new(Arc::clone(&tokens))?);
        let traces = Arc::new(TraceClient::new(Arc::clone(&tokens))?);
        Ok(Self::new(metrics, traces, move |project| {
            let client: Arc<dyn LoggingApi> = Arc::new(LoggingClient::new(Arc::clone(&tokens), project)?);
            Ok(client)
        }))
    }

    pub fn metrics(&self) -> &dyn MetricsApi {
        self.metrics.as_ref()
    }

    pub fn traces(&self) -> &dyn TraceApi {
        self.traces.as_ref()
    }

    /// Logging client for `project`, created on first request.
    ///
    /// A factory failure is not cached; the next call tries again.
    pub fn logs(&self, project: &str) -> Result<Arc<dyn LoggingApi>> {
        let mut clients = self.log_clients.lock();
        if let Some(client) = clients.get(project) {
            return Ok(Arc::clone(client));
        }
        debug!(project, "creating logging client");
        let client = (self.log_factory)(project)?;
        clients.insert(project.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use opsprobe_core::CallContext;

    use super::*;
    use crate::api::TimeSeriesQuery;
    use crate::api::TraceQuery;
    use crate::error::QueryError;
    use crate::types::LogEntry;
    use crate::types::Page;
    use crate::types::TimeSeries;
    use crate::types::Trace;

    struct Nothing;

    #[async_trait]
    impl MetricsApi for Nothing {
        async fn list_time_series(
            &self,
            _ctx: &CallContext,
            _query: &TimeSeriesQuery,
            _page_token: Option<&str>,
        ) -> Result<Page<TimeSeries>> {
            Ok(Page::last(vec![]))
        }
    }

    #[async_trait]
    impl TraceApi for Nothing {
        async fn list_traces(
            &self,
            _ctx: &CallContext,
            _query: &TraceQuery,
            _page_token: Option<&str>,
        ) -> Result<Page<Trace>> {
            Ok(Page::last(vec![]))
        }
    }

    #[async_trait]
    impl LoggingApi for Nothing {
        async fn list_entries(
            &self,
            _ctx: &CallContext,
            _filter: &str,
            _page_token: Option<&str>,
        ) -> Result<Page<LogEntry>> {
            Ok(Page::last(vec![]))
        }
    }

    #[test]
    fn test_log_clients_created_once_per_project() {
        let created = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&created);
        let registry = BackendRegistry::new(Arc::new(Nothing), Arc::new(Nothing), move |project| {
            if project == "broken" {
                return Err(QueryError::NoData);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let client: Arc<dyn LoggingApi> = Arc::new(Nothing);
            Ok(client)
        });

        let first = registry.logs("a").unwrap();
        let again = registry.logs("a").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        registry.logs("b").unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);

        assert!(registry.logs("broken").is_err());
        assert!(!format!("{registry:?}").contains("broken"));
    }
}
