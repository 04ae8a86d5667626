//! Telemetry backend access for the opsprobe harness.
//!
//! - [`api`]: paged read APIs for metrics, logs and traces, plus REST clients
//! - [`registry`]: shared clients, with logging clients created per project
//! - [`lookup`]: one-shot lookups that separate "empty" from "error"
//! - [`wait`]: polling waiters and absence assertions built on the lookups

pub mod api;
pub mod error;
pub mod filter;
pub mod lookup;
pub mod registry;
pub mod types;
pub mod wait;

pub use error::QueryError;
pub use error::Result;
pub use lookup::Lookup;
pub use registry::BackendRegistry;
pub use types::LogEntry;
pub use types::TimeSeries;
pub use types::TimeWindow;
pub use types::Trace;
pub use wait::BackendWaiter;
pub use wait::WaitPolicies;
pub use wait::WaitPolicy;
