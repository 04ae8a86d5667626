//! Wire types for the metrics, logging and trace APIs.
//!
//! Only the fields tests look at are modelled; everything else in the
//! responses is ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Trailing query window `[end - width, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `width` ending now.
    pub fn trailing(width: Duration) -> Self {
        Self::trailing_from(Utc::now(), width)
    }

    pub fn trailing_from(end: DateTime<Utc>, width: Duration) -> Self {
        let width = chrono::Duration::from_std(width).unwrap_or(chrono::Duration::MAX);
        let start = end.checked_sub_signed(width).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// One page of a paged list call.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metric {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Point {
    pub interval: serde_json::Value,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeSeries {
    pub metric: Metric,
    pub resource: MonitoredResource,
    pub metric_kind: String,
    pub value_type: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEntry {
    pub log_name: String,
    pub resource: MonitoredResource,
    pub timestamp: Option<String>,
    pub severity: Option<String>,
    pub insert_id: Option<String>,
    pub text_payload: Option<String>,
    pub json_payload: Option<serde_json::Value>,
    pub labels: BTreeMap<String, String>,
}

/// A trace as listed by the trace API: identifiers only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Trace {
    pub project_id: String,
    pub trace_id: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_trailing_window() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::trailing_from(end, Duration::from_secs(3600));
        assert_eq!(window.start_rfc3339(), "2024-05-01T11:00:00Z");
        assert_eq!(window.end_rfc3339(), "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_time_series_decodes_partial_json() {
        let series: TimeSeries = serde_json::from_str(
            r#"{"metric":{"type":"agent.googleapis.com/cpu/utilization","labels":{"cpu":"0"}},
                "resource":{"type":"gce_instance","labels":{"instance_id":"42"}},
                "points":[{"interval":{"endTime":"2024-05-01T12:00:00Z"},"value":{"doubleValue":0.5}}],
                "unit":"1"}"#,
        )
        .unwrap();
        assert_eq!(series.metric.metric_type, "agent.googleapis.com/cpu/utilization");
        assert_eq!(series.resource.labels["instance_id"], "42");
        assert_eq!(series.points.len(), 1);
    }
}
