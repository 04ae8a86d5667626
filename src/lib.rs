//! Integration-test harness for an observability agent on cloud VMs.
//!
//! Tests build one [`Harness`] and use it to provision VMs, run commands on
//! them, and wait for the agent's metrics, logs and traces to reach the
//! cloud backends.
//!
//! - [`harness`]: the shared facade and its builder
//! - [`lifecycle`]: creation, readiness, remediation, power and deletion
//! - [`images`]: running a test across the configured image matrix
//! - [`logging`]: console tracing and per-test log directories
//!
//! Lower layers live in their own crates: `opsprobe-core` (VM records,
//! configuration, retry), `opsprobe-exec` (local and remote commands) and
//! `opsprobe-backend` (telemetry queries). They are re-exported here.

pub mod error;
pub mod harness;
pub mod images;
pub mod lifecycle;
pub mod logging;

pub use error::HarnessError;
pub use error::Result;
pub use harness::Harness;
pub use harness::HarnessBuilder;
pub use images::first_image_spec;
pub use images::for_each_image;
pub use lifecycle::LifecycleTimings;
pub use lifecycle::instance_log_url;
pub use lifecycle::syslog_location;
pub use logging::TestLogger;
pub use logging::init_tracing;
pub use opsprobe_backend;
pub use opsprobe_core;
pub use opsprobe_exec;
