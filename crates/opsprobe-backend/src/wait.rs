//! Polling waiters for eventually-consistent telemetry backends.
//!
//! Data written by the agent takes a while to become queryable, so every
//! positive check ("the metric exists") polls until the data shows up and
//! every negative check ("the log is absent") polls until the backend gives
//! a trustworthy empty answer.
//!
//! Budgets come from [`WaitPolicies`]; the defaults are the constants in
//! `opsprobe_core::constants`. No waiter sleeps after its final attempt.

use std::sync::Arc;
use std::time::Duration;

use opsprobe_core::CallContext;
use opsprobe_core::RetryError;
use opsprobe_core::RetryPolicy;
use opsprobe_core::RpcCode;
use opsprobe_core::Vm;
use opsprobe_core::constants::LOG_MISSING_MAX_ATTEMPTS;
use opsprobe_core::constants::LOG_QUERY_BACKOFF;
use opsprobe_core::constants::LOG_QUERY_MAX_ATTEMPTS;
use opsprobe_core::constants::METRIC_MISSING_MAX_ATTEMPTS;
use opsprobe_core::constants::METRIC_QUERY_BACKOFF;
use opsprobe_core::constants::METRIC_QUERY_MAX_ATTEMPTS;
use opsprobe_core::constants::TRACE_QUERY_BACKOFF;
use opsprobe_core::constants::TRACE_QUERY_MAX_ATTEMPTS;
use opsprobe_core::retry;
use opsprobe_core::verified::ErrorClass;
use opsprobe_core::verified::classify::classify_log_missing_message;
use opsprobe_core::verified::classify::classify_log_query_message;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::api::TimeSeriesQuery;
use crate::api::TraceQuery;
use crate::error::QueryError;
use crate::error::Result;
use crate::filter::log_filter;
use crate::filter::metric_filter;
use crate::filter::trace_filter;
use crate::lookup::Lookup;
use crate::lookup::first_trace;
use crate::lookup::lookup_logs;
use crate::lookup::lookup_metric_series;
use crate::registry::BackendRegistry;
use crate::types::LogEntry;
use crate::types::TimeSeries;
use crate::types::TimeWindow;
use crate::types::Trace;

/// Attempt budget and spacing for one kind of check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl WaitPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::constant(self.backoff).with_max_attempts(self.max_attempts.max(1))
    }
}

/// Budgets for every waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicies {
    pub metric: WaitPolicy,
    pub metric_missing: WaitPolicy,
    pub trace: WaitPolicy,
    pub log: WaitPolicy,
    pub log_missing: WaitPolicy,
}

impl Default for WaitPolicies {
    fn default() -> Self {
        Self {
            metric: WaitPolicy::new(METRIC_QUERY_MAX_ATTEMPTS, METRIC_QUERY_BACKOFF),
            metric_missing: WaitPolicy::new(METRIC_MISSING_MAX_ATTEMPTS, METRIC_QUERY_BACKOFF),
            trace: WaitPolicy::new(TRACE_QUERY_MAX_ATTEMPTS, TRACE_QUERY_BACKOFF),
            log: WaitPolicy::new(LOG_QUERY_MAX_ATTEMPTS, LOG_QUERY_BACKOFF),
            log_missing: WaitPolicy::new(LOG_MISSING_MAX_ATTEMPTS, LOG_QUERY_BACKOFF),
        }
    }
}

/// Map the outcome of a retried query onto the waiter error taxonomy.
fn finish<T>(what: String, result: std::result::Result<T, RetryError<QueryError>>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(RetryError::Permanent { error, .. }) => Err(QueryError::Query {
            what,
            source: Box::new(error),
        }),
        Err(RetryError::Exhausted { attempts, error }) => Err(QueryError::ExhaustedRetries {
            what,
            attempts,
            last: Box::new(error),
        }),
        Err(RetryError::Interrupted { reason, .. }) => Err(QueryError::Query {
            what,
            source: Box::new(QueryError::Interrupted { reason }),
        }),
    }
}

/// Polls the backends in a [`BackendRegistry`] on behalf of tests.
#[derive(Debug, Clone)]
pub struct BackendWaiter {
    registry: Arc<BackendRegistry>,
    policies: WaitPolicies,
}

impl BackendWaiter {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            policies: WaitPolicies::default(),
        }
    }

    pub fn with_policies(mut self, policies: WaitPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn policies(&self) -> &WaitPolicies {
        &self.policies
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// First non-empty series of `metric` reported by `vm`.
    pub async fn wait_for_metric(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        metric: &str,
        window: Duration,
        extra_filters: &[String],
        is_prometheus: bool,
    ) -> Result<TimeSeries> {
        let series = self.wait_for_metric_series(ctx, vm, metric, window, extra_filters, is_prometheus, 1).await?;
        series.into_iter().next().ok_or(QueryError::NoData)
    }

    /// At least `minimum` non-empty series of `metric` reported by `vm`.
    ///
    /// Empty answers, too few series and retriable status codes are polled
    /// through; exhausting the budget yields [`QueryError::ExhaustedRetries`].
    #[allow(clippy::too_many_arguments)]
    pub async fn wait_for_metric_series(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        metric: &str,
        window: Duration,
        extra_filters: &[String],
        is_prometheus: bool,
        minimum: usize,
    ) -> Result<Vec<TimeSeries>> {
        if minimum < 1 {
            return Err(QueryError::InvalidMinimum { minimum });
        }
        let what = format!("wait for metric {metric} (filters {extra_filters:?})");
        let filter = metric_filter(vm, metric, extra_filters, is_prometheus);
        let policy = self.policies.metric;
        let metrics = self.registry.metrics();

        let result = retry(ctx, &policy.retry_policy(), QueryError::lookup_class, |attempt_ctx, attempt| {
            let query = TimeSeriesQuery {
                project: vm.project.clone(),
                filter: filter.clone(),
                window: TimeWindow::trailing(window),
            };
            async move {
                match lookup_metric_series(metrics, &attempt_ctx, &query, minimum).await {
                    Ok(Lookup::Found(series)) => {
                        info!(vm = %vm.name, metric, series = series.len(), attempt, "found metric series");
                        Ok(series)
                    }
                    Ok(Lookup::Empty) => {
                        debug!(vm = %vm.name, metric, attempt, max = policy.max_attempts, "no metric data yet");
                        Err(QueryError::NoData)
                    }
                    Err(e) => {
                        debug!(vm = %vm.name, metric, attempt, max = policy.max_attempts, error = %e, "metric lookup failed");
                        Err(e)
                    }
                }
            }
        })
        .await;
        finish(what, result)
    }

    /// Succeeds only when the backend confirms there is no data for `metric`.
    ///
    /// Prometheus metric descriptors only exist after the first write, so for
    /// them a NOT_FOUND on every attempt also counts as absent.
    pub async fn assert_metric_missing(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        metric: &str,
        is_prometheus: bool,
        window: Duration,
    ) -> Result<()> {
        let what = format!("assert metric {metric} missing");
        let filter = metric_filter(vm, metric, &[], is_prometheus);
        let policy = self.policies.metric_missing;
        let mut descriptor_not_found: u32 = 0;

        for attempt in 1..=policy.max_attempts {
            let query = TimeSeriesQuery {
                project: vm.project.clone(),
                filter: filter.clone(),
                window: TimeWindow::trailing(window),
            };
            match lookup_metric_series(self.registry.metrics(), ctx, &query, 1).await {
                Ok(Lookup::Empty) => {
                    info!(vm = %vm.name, metric, attempt, "metric confirmed missing");
                    return Ok(());
                }
                Ok(Lookup::Found(series)) => {
                    return Err(QueryError::UnexpectedlyFound {
                        what,
                        count: series.len(),
                    });
                }
                Err(e) if !e.lookup_class().is_retriable() => {
                    return Err(QueryError::Query {
                        what,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    if is_prometheus && e.code() == Some(RpcCode::NotFound) {
                        descriptor_not_found += 1;
                    }
                    debug!(vm = %vm.name, metric, attempt, max = policy.max_attempts, error = %e, "absence check inconclusive");
                }
            }
            if attempt < policy.max_attempts {
                ctx.sleep(policy.backoff).await.map_err(|reason| QueryError::Interrupted { reason })?;
            }
        }

        if !is_prometheus {
            return Err(QueryError::NoSuccessfulQueries {
                what,
                attempts: policy.max_attempts,
            });
        }
        if descriptor_not_found != policy.max_attempts {
            return Err(QueryError::MixedQueryFailures {
                what,
                not_found: descriptor_not_found,
                attempts: policy.max_attempts,
            });
        }
        info!(vm = %vm.name, metric, "prometheus metric descriptor never created");
        Ok(())
    }

    /// Any trace from `vm` matching `extra_filters`.
    ///
    /// Only the project and trace IDs are populated.
    pub async fn wait_for_trace(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        window: Duration,
        extra_filters: &[String],
    ) -> Result<Trace> {
        let what = "wait for trace".to_string();
        let filter = trace_filter(vm, extra_filters);
        let policy = self.policies.trace;
        let traces = self.registry.traces();

        let result = retry(ctx, &policy.retry_policy(), QueryError::lookup_class, |attempt_ctx, attempt| {
            let query = TraceQuery {
                project: vm.project.clone(),
                filter: filter.clone(),
                window: TimeWindow::trailing(window),
            };
            async move {
                match first_trace(traces, &attempt_ctx, &query).await? {
                    Some(trace) => {
                        info!(vm = %vm.name, trace_id = %trace.trace_id, attempt, "found trace");
                        Ok(trace)
                    }
                    None => {
                        debug!(vm = %vm.name, attempt, max = policy.max_attempts, "no trace yet");
                        Err(QueryError::NoData)
                    }
                }
            }
        })
        .await;
        finish(what, result)
    }

    /// First log entry from `vm` in a log matching `log_name_regex`.
    ///
    /// `query` is an optional extra logging filter clause. Makes at most
    /// `max_attempts` queries; zero is rejected with
    /// [`QueryError::InvalidMaxAttempts`] before any query.
    pub async fn query_log(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        log_name_regex: &str,
        window: Duration,
        query: &str,
        max_attempts: u32,
    ) -> Result<LogEntry> {
        if max_attempts == 0 {
            return Err(QueryError::InvalidMaxAttempts { max_attempts });
        }
        let what = format!("query log {log_name_regex}");
        let logs = self.registry.logs(&vm.project).map_err(|e| QueryError::Query {
            what: what.clone(),
            source: Box::new(e),
        })?;
        let policy = WaitPolicy::new(max_attempts, self.policies.log.backoff);
        let classify = |e: &QueryError| match e {
            QueryError::NoData => ErrorClass::Retriable,
            other => classify_log_query_message(&other.to_string()),
        };

        let result = retry(ctx, &policy.retry_policy(), classify, |attempt_ctx, attempt| {
            let filter = log_filter(vm, log_name_regex, TimeWindow::trailing(window).start, query);
            let logs = Arc::clone(&logs);
            async move {
                debug!(vm = %vm.name, filter = %filter, attempt, "querying logs");
                match lookup_logs(logs.as_ref(), &attempt_ctx, &filter).await? {
                    Lookup::Found(entries) => {
                        info!(vm = %vm.name, log = log_name_regex, entries = entries.len(), attempt, "found matching logs");
                        entries.into_iter().next().ok_or(QueryError::NoData)
                    }
                    Lookup::Empty => Err(QueryError::NoData),
                }
            }
        })
        .await;
        finish(what, result)
    }

    /// Like [`query_log`](Self::query_log) with the default log budget.
    pub async fn wait_for_log(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        log_name_regex: &str,
        window: Duration,
        query: &str,
    ) -> Result<()> {
        self.query_log(ctx, vm, log_name_regex, window, query, self.policies.log.max_attempts)
            .await
            .map(|_| ())
    }

    /// Succeeds when no matching log exists.
    ///
    /// Internal backend errors are retried; running out of attempts on them
    /// counts as absent.
    pub async fn assert_log_missing(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        log_name_regex: &str,
        window: Duration,
        query: &str,
    ) -> Result<()> {
        let what = format!("assert log {log_name_regex} missing (query {query:?})");
        let logs = self.registry.logs(&vm.project).map_err(|e| QueryError::Query {
            what: what.clone(),
            source: Box::new(e),
        })?;
        let policy = self.policies.log_missing;

        for attempt in 1..=policy.max_attempts {
            let filter = log_filter(vm, log_name_regex, TimeWindow::trailing(window).start, query);
            match lookup_logs(logs.as_ref(), ctx, &filter).await {
                Ok(Lookup::Empty) => return Ok(()),
                Ok(Lookup::Found(entries)) => {
                    return Err(QueryError::UnexpectedlyFound {
                        what,
                        count: entries.len(),
                    });
                }
                Err(e) if classify_log_missing_message(&e.to_string()).is_retriable() => {
                    debug!(vm = %vm.name, attempt, max = policy.max_attempts, error = %e, "log absence check inconclusive");
                }
                Err(e) => {
                    return Err(QueryError::Query {
                        what,
                        source: Box::new(e),
                    });
                }
            }
            if attempt < policy.max_attempts {
                ctx.sleep(policy.backoff).await.map_err(|reason| QueryError::Interrupted { reason })?;
            }
        }
        warn!(vm = %vm.name, log = log_name_regex, "no conclusive log query, treating log as missing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use opsprobe_core::DoneReason;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::api::LoggingApi;
    use crate::api::MetricsApi;
    use crate::api::TraceApi;
    use crate::types::Page;
    use crate::types::Point;

    /// Replays scripted pages, then answers with empty pages forever.
    struct Scripted<T> {
        responses: Mutex<VecDeque<Result<Vec<T>>>>,
        calls: Mutex<u32>,
        filters: Mutex<Vec<String>>,
    }

    impl<T> Scripted<T> {
        fn new(responses: Vec<Result<Vec<T>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
                filters: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, filter: &str) -> Result<Page<T>> {
            *self.calls.lock() += 1;
            self.filters.lock().push(filter.to_string());
            let items = self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
            Ok(Page::last(items))
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl MetricsApi for Scripted<TimeSeries> {
        async fn list_time_series(
            &self,
            _ctx: &CallContext,
            query: &TimeSeriesQuery,
            _page_token: Option<&str>,
        ) -> Result<Page<TimeSeries>> {
            self.next(&query.filter)
        }
    }

    #[async_trait]
    impl TraceApi for Scripted<Trace> {
        async fn list_traces(&self, _ctx: &CallContext, query: &TraceQuery, _page_token: Option<&str>) -> Result<Page<Trace>> {
            self.next(&query.filter)
        }
    }

    #[async_trait]
    impl LoggingApi for Scripted<LogEntry> {
        async fn list_entries(&self, _ctx: &CallContext, filter: &str, _page_token: Option<&str>) -> Result<Page<LogEntry>> {
            self.next(filter)
        }
    }

    struct Fixture {
        metrics: Arc<Scripted<TimeSeries>>,
        traces: Arc<Scripted<Trace>>,
        logs: Arc<Scripted<LogEntry>>,
        waiter: BackendWaiter,
    }

    fn fixture(
        metrics: Vec<Result<Vec<TimeSeries>>>,
        traces: Vec<Result<Vec<Trace>>>,
        logs: Vec<Result<Vec<LogEntry>>>,
    ) -> Fixture {
        let metrics = Scripted::new(metrics);
        let traces = Scripted::new(traces);
        let logs = Scripted::new(logs);
        let log_client = Arc::clone(&logs);
        let registry = BackendRegistry::new(
            Arc::clone(&metrics) as Arc<dyn MetricsApi>,
            Arc::clone(&traces) as Arc<dyn TraceApi>,
            move |_project| Ok(Arc::clone(&log_client) as Arc<dyn LoggingApi>),
        );
        Fixture {
            metrics,
            traces,
            logs,
            waiter: BackendWaiter::new(Arc::new(registry)),
        }
    }

    fn vm() -> Vm {
        let mut vm = Vm::pending(
            "test-vm".into(),
            "my-project".into(),
            "default".into(),
            "debian-cloud:debian-12".parse().unwrap(),
            "us-central1-a".into(),
            "e2-standard-4".into(),
        );
        vm.id = 42;
        vm
    }

    fn series() -> TimeSeries {
        TimeSeries {
            points: vec![Point::default()],
            ..Default::default()
        }
    }

    fn api_error(code: RpcCode, message: &str) -> QueryError {
        QueryError::Api {
            code,
            status: 500,
            message: message.to_string(),
        }
    }

    const WINDOW: Duration = Duration::from_secs(3600);
    const METRIC: &str = "agent.googleapis.com/cpu/utilization";

    #[tokio::test(start_paused = true)]
    async fn test_metric_found_after_empty_answers() {
        let f = fixture(vec![Ok(vec![]), Err(api_error(RpcCode::Internal, "transient")), Ok(vec![series()])], vec![], vec![]);
        let started = Instant::now();
        let found = f.waiter.wait_for_metric(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false).await;
        assert!(found.is_ok());
        assert_eq!(f.metrics.calls(), 3);
        assert_eq!(started.elapsed(), 2 * METRIC_QUERY_BACKOFF);
        assert!(f.metrics.filters.lock()[0].contains("resource.labels.instance_id = \"42\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metric_exhausts_budget_without_trailing_sleep() {
        let f = fixture(vec![], vec![], vec![]);
        let waiter = f.waiter.clone().with_policies(WaitPolicies {
            metric: WaitPolicy::new(3, Duration::from_secs(10)),
            ..WaitPolicies::default()
        });
        let started = Instant::now();
        let err = waiter.wait_for_metric(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false).await.unwrap_err();
        assert!(err.is_exhausted_retries());
        assert!(err.to_string().contains("exhausted retries after 3 attempts"));
        assert_eq!(f.metrics.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metric_permanent_error_is_immediate() {
        let f = fixture(vec![Err(api_error(RpcCode::PermissionDenied, "denied"))], vec![], vec![]);
        let err = f.waiter.wait_for_metric(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false).await.unwrap_err();
        assert!(!err.is_exhausted_retries());
        assert_eq!(err.code(), Some(RpcCode::PermissionDenied));
        assert_eq!(f.metrics.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_few_series_is_polled_through() {
        let f = fixture(vec![Ok(vec![series()]), Ok(vec![series(), series()])], vec![], vec![]);
        let found = f
            .waiter
            .wait_for_metric_series(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false, 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(f.metrics.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistently_too_few_series_exhausts_budget() {
        let f = fixture((0..2 * METRIC_QUERY_MAX_ATTEMPTS).map(|_| Ok(vec![series()])).collect(), vec![], vec![]);
        let started = Instant::now();
        let err = f
            .waiter
            .wait_for_metric_series(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false, 2)
            .await
            .unwrap_err();
        match err {
            QueryError::ExhaustedRetries { attempts, last, .. } => {
                assert_eq!(attempts, METRIC_QUERY_MAX_ATTEMPTS);
                assert!(matches!(*last, QueryError::InvalidIteratorLength { found: 1, minimum: 2 }));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(f.metrics.calls(), 40);
        assert_eq!(started.elapsed(), 39 * METRIC_QUERY_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_minimum_rejected_before_querying() {
        let f = fixture(vec![], vec![], vec![]);
        let err = f
            .waiter
            .wait_for_metric_series(&CallContext::background(), &vm(), METRIC, WINDOW, &[], false, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidMinimum { minimum: 0 }));
        assert_eq!(f.metrics.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_is_not_exhaustion() {
        let f = fixture(vec![], vec![], vec![]);
        let ctx = CallContext::background();
        ctx.cancel();
        let err = f.waiter.wait_for_metric(&ctx, &vm(), METRIC, WINDOW, &[], false).await.unwrap_err();
        assert!(!err.is_exhausted_retries());
        assert!(matches!(err, QueryError::Query { ref source, .. } if matches!(**source, QueryError::Interrupted { reason: DoneReason::Cancelled })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_metric_missing_outcomes() {
        let ctx = CallContext::background();

        let f = fixture(vec![Ok(vec![])], vec![], vec![]);
        assert!(f.waiter.assert_metric_missing(&ctx, &vm(), METRIC, false, WINDOW).await.is_ok());

        let f = fixture(vec![Ok(vec![series()])], vec![], vec![]);
        let err = f.waiter.assert_metric_missing(&ctx, &vm(), METRIC, false, WINDOW).await.unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedlyFound { count: 1, .. }));

        let internal = || Err(api_error(RpcCode::Internal, "transient"));
        let f = fixture((0..5).map(|_| internal()).collect(), vec![], vec![]);
        let err = f.waiter.assert_metric_missing(&ctx, &vm(), METRIC, false, WINDOW).await.unwrap_err();
        assert!(matches!(err, QueryError::NoSuccessfulQueries { attempts: 5, .. }));
        assert_eq!(f.metrics.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_prometheus_metric_missing_tolerates_not_found() {
        let ctx = CallContext::background();
        let prom = "prometheus.googleapis.com/up/gauge";
        let not_found = || Err(api_error(RpcCode::NotFound, "Cannot find metric(s)"));

        let f = fixture((0..5).map(|_| not_found()).collect(), vec![], vec![]);
        assert!(f.waiter.assert_metric_missing(&ctx, &vm(), prom, true, WINDOW).await.is_ok());
        assert!(f.metrics.filters.lock()[0].contains("resource.labels.namespace = \"42/test-vm\""));

        let mut mixed: Vec<Result<Vec<TimeSeries>>> = (0..4).map(|_| not_found()).collect();
        mixed.push(Err(api_error(RpcCode::ResourceExhausted, "Quota exceeded")));
        let f = fixture(mixed, vec![], vec![]);
        let err = f.waiter.assert_metric_missing(&ctx, &vm(), prom, true, WINDOW).await.unwrap_err();
        assert!(matches!(err, QueryError::MixedQueryFailures { not_found: 4, attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trace_found_after_derated_backoff() {
        let trace = Trace {
            project_id: "my-project".into(),
            trace_id: "abc".into(),
        };
        let f = fixture(vec![], vec![Ok(vec![]), Ok(vec![trace.clone()])], vec![]);
        let started = Instant::now();
        let found = f
            .waiter
            .wait_for_trace(&CallContext::background(), &vm(), WINDOW, &["span:run".into()])
            .await
            .unwrap();
        assert_eq!(found, trace);
        assert_eq!(started.elapsed(), TRACE_QUERY_BACKOFF);
        assert_eq!(f.traces.filters.lock()[0], "+g.co/r/gce_instance/instance_id:42 span:run");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trace_exhaustion() {
        let f = fixture(vec![], vec![], vec![]);
        let err = f.waiter.wait_for_trace(&CallContext::background(), &vm(), WINDOW, &[]).await.unwrap_err();
        assert!(err.is_exhausted_retries());
        assert_eq!(f.traces.calls(), TRACE_QUERY_MAX_ATTEMPTS);
    }

    fn entry(insert_id: &str) -> LogEntry {
        LogEntry {
            insert_id: Some(insert_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_log_retries_internal_and_quota() {
        let f = fixture(
            vec![],
            vec![],
            vec![
                Err(api_error(RpcCode::Internal, "Internal error encountered.")),
                Err(api_error(RpcCode::ResourceExhausted, "Quota exceeded for quota metric 'Read requests'")),
                Ok(vec![]),
                Ok(vec![entry("first"), entry("second")]),
            ],
        );
        let found = f
            .waiter
            .query_log(&CallContext::background(), &vm(), "syslog", WINDOW, "severity=ERROR", 10)
            .await
            .unwrap();
        assert_eq!(found.insert_id.as_deref(), Some("first"));
        assert_eq!(f.logs.calls(), 4);
        let filters = f.logs.filters.lock();
        let filter = &filters[0];
        assert!(filter.starts_with("logName=~\"projects/my-project/logs/syslog\""));
        assert!(filter.ends_with(" AND severity=ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_log_permanent_and_exhausted() {
        let f = fixture(vec![], vec![], vec![Err(api_error(RpcCode::InvalidArgument, "bad filter"))]);
        let err = f.waiter.wait_for_log(&CallContext::background(), &vm(), "syslog", WINDOW, "").await.unwrap_err();
        assert!(!err.is_exhausted_retries());
        assert_eq!(f.logs.calls(), 1);

        let f = fixture(vec![], vec![], vec![]);
        let started = Instant::now();
        let err = f
            .waiter
            .query_log(&CallContext::background(), &vm(), "syslog", WINDOW, "", 3)
            .await
            .unwrap_err();
        assert!(err.is_exhausted_retries());
        assert_eq!(started.elapsed(), 2 * LOG_QUERY_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_log_rejects_zero_attempts() {
        let f = fixture(vec![], vec![], vec![Ok(vec![entry("never-read")])]);
        let err = f
            .waiter
            .query_log(&CallContext::background(), &vm(), "syslog", WINDOW, "", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidMaxAttempts { max_attempts: 0 }));
        assert!(!err.is_exhausted_retries());
        assert_eq!(f.logs.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_log_missing_outcomes() {
        let ctx = CallContext::background();
        let internal = || Err(api_error(RpcCode::Internal, "Internal error encountered."));

        let f = fixture(vec![], vec![], (0..5).map(|_| internal()).collect());
        assert!(f.waiter.assert_log_missing(&ctx, &vm(), "syslog", WINDOW, "").await.is_ok());
        assert_eq!(f.logs.calls(), 5);

        let f = fixture(vec![], vec![], vec![internal(), Ok(vec![entry("x")])]);
        let err = f.waiter.assert_log_missing(&ctx, &vm(), "syslog", WINDOW, "").await.unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedlyFound { count: 1, .. }));

        let f = fixture(vec![], vec![], vec![Err(api_error(RpcCode::ResourceExhausted, "Quota exceeded"))]);
        assert!(f.waiter.assert_log_missing(&ctx, &vm(), "syslog", WINDOW, "").await.is_err());
        assert_eq!(f.logs.calls(), 1);
    }
}
