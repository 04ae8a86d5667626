//! Timeouts, attempt budgets and fixed names used across opsprobe.
//!
//! Tiger Style: every wait in the harness is bounded by one of these values.
//! Callers that need faster loops (tests) pass their own policies rather than
//! editing these.

use std::time::Duration;

// ============================================================================
// Provisioning
// ============================================================================

/// Per-attempt budget for creating a VM and waiting for it to become ready.
pub const VM_INIT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Number of creation attempts that fit in the overall provisioning budget.
///
/// The overall budget is `VM_INIT_TIMEOUT * VM_INIT_ATTEMPT_BUDGET`.
pub const VM_INIT_ATTEMPT_BUDGET: u32 = 3;

/// Constant backoff between creation attempts.
pub const VM_CREATE_BACKOFF: Duration = Duration::from_secs(60);

/// Backoff between readiness checks.
pub const VM_INIT_BACKOFF: Duration = Duration::from_secs(10);

/// Timeout for a single readiness check over ssh.
pub const VM_INIT_POKE_SSH_TIMEOUT: Duration = Duration::from_secs(30);

/// SUSE guests stop probing readiness after this long.
///
/// Their readiness failures are retried at the provisioning level instead.
pub const SUSE_READINESS_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// Extra settling delay for SUSE guests after `systemctl` reports ready.
pub const SLES_STARTUP_DELAY: Duration = Duration::from_secs(60);

/// Backoff between `sudo` checks on SUSE guests.
pub const SLES_SUDO_BACKOFF: Duration = Duration::from_secs(5);

/// Attempts for the `sudo` check on SUSE guests.
pub const SLES_SUDO_MAX_ATTEMPTS: u32 = 60;

/// Attempts for `registercloudguest --force` on SLES.
pub const SLES_REGISTER_MAX_ATTEMPTS: u32 = 5;

/// Attempts for refreshing zypper and reinstalling coreutils on SLES.
pub const SLES_REFRESH_MAX_ATTEMPTS: u32 = 120;

/// Backoff used by the SLES preparation steps.
pub const SLES_PREPARE_BACKOFF: Duration = Duration::from_secs(5);

/// Managed instance groups wait this many seconds to become stable.
pub const MIG_STABLE_TIMEOUT_SECS: u32 = 300;

// ============================================================================
// Start / delete
// ============================================================================

/// Budget for starting a stopped instance, including readiness.
pub const VM_START_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Backoff between start attempts.
pub const VM_START_BACKOFF: Duration = Duration::from_secs(60);

/// Budget for deleting an instance. Independent of the caller's context.
pub const VM_DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Backoff between delete attempts.
pub const VM_DELETE_BACKOFF: Duration = Duration::from_secs(30);

/// Retries after the first delete attempt.
pub const VM_DELETE_MAX_RETRIES: u32 = 10;

// ============================================================================
// Backend queries
// ============================================================================

/// Attempts when waiting for a metric series to appear.
pub const METRIC_QUERY_MAX_ATTEMPTS: u32 = 40;

/// Backoff between metric queries.
pub const METRIC_QUERY_BACKOFF: Duration = Duration::from_secs(10);

/// Attempts when asserting that a metric is absent.
pub const METRIC_MISSING_MAX_ATTEMPTS: u32 = 5;

/// Attempts when waiting for a log entry to appear.
pub const LOG_QUERY_MAX_ATTEMPTS: u32 = 15;

/// Backoff between log queries.
pub const LOG_QUERY_BACKOFF: Duration = Duration::from_secs(30);

/// Attempts when asserting that a log entry is absent.
pub const LOG_MISSING_MAX_ATTEMPTS: u32 = 5;

/// Trace queries are more expensive; both the attempt count and the spacing
/// are derived from the metric settings by this factor.
pub const TRACE_QUERY_DERATE: u32 = 6;

/// Attempts when waiting for a trace (40 / 6).
pub const TRACE_QUERY_MAX_ATTEMPTS: u32 = METRIC_QUERY_MAX_ATTEMPTS / TRACE_QUERY_DERATE;

/// Backoff between trace queries (6 * 10s).
pub const TRACE_QUERY_BACKOFF: Duration = Duration::from_secs(10 * TRACE_QUERY_DERATE as u64);

/// Page size requested from paged backend APIs.
pub const BACKEND_PAGE_SIZE: u32 = 1_000;

/// Upper bound on pages fetched by a single lookup.
pub const MAX_BACKEND_PAGES: u32 = 100;

// ============================================================================
// Remote execution
// ============================================================================

/// Login user injected into every VM through instance metadata.
pub const SSH_USER_NAME: &str = "test_user";

/// ssh connect timeout in seconds.
pub const SSH_CONNECT_TIMEOUT_SECS: u32 = 120;

/// Grace period between SIGTERM and SIGKILL when a command is cancelled.
pub const PROCESS_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifetime of a cached `gcloud` access token.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Suggested top-level timeout for a whole integration test.
pub const SUGGESTED_TEST_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

// ============================================================================
// Defaults
// ============================================================================

/// Network used when `NETWORK_NAME` is unset.
pub const DEFAULT_NETWORK: &str = "default";

/// Bucket used to move files onto VMs when `TRANSFERS_BUCKET` is unset.
pub const DEFAULT_TRANSFERS_BUCKET: &str = "stackdriver-test-143416-file-transfers";

/// Machine type for x86 images.
pub const DEFAULT_MACHINE_TYPE: &str = "e2-standard-4";

/// Machine type for ARM images.
pub const DEFAULT_ARM_MACHINE_TYPE: &str = "t2a-standard-4";

/// Image family scope passed to `gcloud` unless overridden.
pub const DEFAULT_IMAGE_FAMILY_SCOPE: &str = "global";

/// Network tag that blocks egress traffic when attached to a VM.
pub const DENY_EGRESS_TRAFFIC_TAG: &str = "test-ops-agent-deny-egress-traffic-tag";

/// systemd units of the agent under test.
pub const AGENT_SERVICES: [&str; 3] = [
    "google-cloud-ops-agent",
    "google-cloud-ops-agent-fluent-bit",
    "google-cloud-ops-agent-opentelemetry-collector",
];
