//! Query filters scoped to a single VM.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use opsprobe_core::Vm;

/// `value` as a double-quoted filter string literal.
///
/// Backslashes and double quotes inside `value` are escaped.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Monitoring filter for `metric` on `vm`.
///
/// Prometheus metrics are keyed by a `<id>/<name>` namespace label instead
/// of the instance ID.
pub fn metric_filter(vm: &Vm, metric: &str, extra_filters: &[String], is_prometheus: bool) -> String {
    let mut filters = vec![format!("metric.type = {}", quote(metric))];
    if is_prometheus {
        filters.push(format!("resource.labels.namespace = {}", quote(&format!("{}/{}", vm.id, vm.name))));
    } else {
        filters.push(format!("resource.labels.instance_id = \"{}\"", vm.id));
    }
    filters.extend(extra_filters.iter().cloned());
    filters.join(" AND ")
}

/// Logging filter for entries from `vm` newer than `since`.
pub fn log_filter(vm: &Vm, log_name_regex: &str, since: DateTime<Utc>, query: &str) -> String {
    let mut filter = format!(
        "logName=~{} AND resource.labels.instance_id=\"{}\" AND timestamp > \"{}\"",
        quote(&format!("projects/{}/logs/{log_name_regex}", vm.project)),
        vm.id,
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if !query.is_empty() {
        filter.push_str(" AND ");
        filter.push_str(query);
    }
    filter
}

/// Trace filter for traces from `vm`; terms are space separated.
pub fn trace_filter(vm: &Vm, extra_filters: &[String]) -> String {
    let mut filters = vec![format!("+g.co/r/gce_instance/instance_id:{}", vm.id)];
    filters.extend(extra_filters.iter().cloned());
    filters.join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn vm() -> Vm {
        let mut vm = Vm::pending(
            "test-vm".into(),
            "my-project".into(),
            "default".into(),
            "debian-cloud:debian-12".parse().unwrap(),
            "us-central1-a".into(),
            "e2-standard-4".into(),
        );
        vm.id = 1234;
        vm
    }

    #[test]
    fn test_metric_filter() {
        assert_eq!(
            metric_filter(&vm(), "agent.googleapis.com/cpu/utilization", &["metric.labels.cpu = \"0\"".into()], false),
            "metric.type = \"agent.googleapis.com/cpu/utilization\" AND resource.labels.instance_id = \"1234\" AND metric.labels.cpu = \"0\""
        );
        assert_eq!(
            metric_filter(&vm(), "prometheus.googleapis.com/up/gauge", &[], true),
            "metric.type = \"prometheus.googleapis.com/up/gauge\" AND resource.labels.namespace = \"1234/test-vm\""
        );
    }

    #[test]
    fn test_quoted_values_cannot_close_the_literal() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
        let filter = metric_filter(&vm(), r#"custom.googleapis.com/x" OR metric.type = "y"#, &[], false);
        assert_eq!(
            filter,
            r#"metric.type = "custom.googleapis.com/x\" OR metric.type = \"y" AND resource.labels.instance_id = "1234""#
        );
    }

    #[test]
    fn test_log_filter_escapes_regex_backslashes() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        assert!(log_filter(&vm(), r"ops\.log", since, "").starts_with(r#"logName=~"projects/my-project/logs/ops\\.log" AND"#));
    }

    #[test]
    fn test_log_filter() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        assert_eq!(
            log_filter(&vm(), "syslog", since, "severity=ERROR"),
            "logName=~\"projects/my-project/logs/syslog\" AND resource.labels.instance_id=\"1234\" AND timestamp > \"2024-05-01T11:00:00Z\" AND severity=ERROR"
        );
        assert!(!log_filter(&vm(), "syslog", since, "").ends_with(" AND "));
    }

    #[test]
    fn test_trace_filter() {
        assert_eq!(trace_filter(&vm(), &["span:foo".into()]), "+g.co/r/gce_instance/instance_id:1234 span:foo");
    }
}
