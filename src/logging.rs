//! Process-wide tracing setup and per-test log files.
//!
//! Every test gets its own directory under the output root. While a
//! [`TestLogger`] is alive, events emitted on the test's thread go to
//! `main_log.txt` in that directory instead of the shared console output.
//! Futures that may run on other runtime workers, and tasks a test spawns,
//! are routed there with [`TestLogger::scope`].

use std::fs::File;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use opsprobe_core::HarnessConfig;
use snafu::ResultExt;
use tracing::Dispatch;
use tracing::dispatcher::DefaultGuard;
use tracing::info;
use tracing::instrument::WithDispatch;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::EnvFilter;

use crate::error::LogDirSnafu;
use crate::error::Result;

/// Default browser root for logs uploaded by CI.
pub const DEFAULT_LOG_UPLOAD_URL_ROOT: &str =
    "https://console.cloud.google.com/storage/browser/ops-agents-public-buckets-test-logs/";

const MAIN_LOG: &str = "main_log.txt";

/// Install the console subscriber. Filtering follows `RUST_LOG`, `info` by
/// default. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().try_init();
}

/// Test names become directory names.
pub fn sanitize_test_name(test_name: &str) -> String {
    test_name.replace('/', "_")
}

/// Where a test's logs can be found once the run is over.
///
/// In CI this is the uploaded artifacts location; locally, the directory
/// itself.
pub fn log_location(config: &HarnessConfig, log_root: &Path, test_name: &str) -> String {
    let test_name = sanitize_test_name(test_name);
    match &config.artifacts_subdir {
        Some(subdir) => {
            let root = config.log_upload_url_root.as_deref().unwrap_or(DEFAULT_LOG_UPLOAD_URL_ROOT);
            format!("{root}{subdir}/logs/{test_name}")
        }
        None => log_root.join(test_name).display().to_string(),
    }
}

/// Per-test log directory with a file subscriber scoped to the test.
#[derive(Debug)]
pub struct TestLogger {
    dir: PathBuf,
    location: String,
    dispatch: Dispatch,
    _guard: DefaultGuard,
}

impl TestLogger {
    /// Create the test's log directory and route the current thread's
    /// events into it.
    ///
    /// Without a configured output root, logs go under the system temp
    /// directory.
    pub fn start(config: &HarnessConfig, test_name: &str) -> Result<Self> {
        let root = config
            .log_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("opsprobe-logs"));
        let dir = root.join(sanitize_test_name(test_name));
        std::fs::create_dir_all(&dir).context(LogDirSnafu { path: &dir })?;

        let main_log = dir.join(MAIN_LOG);
        let file = File::create(&main_log).context(LogDirSnafu { path: &main_log })?;
        let subscriber = tracing_subscriber::fmt()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .with_env_filter(EnvFilter::new("debug"))
            .finish();
        let dispatch = Dispatch::new(subscriber);
        let guard = tracing::dispatcher::set_default(&dispatch);

        let location = log_location(config, &root, test_name);
        info!(test = test_name, location = %location, "test logs");
        Ok(Self {
            dir,
            location,
            dispatch,
            _guard: guard,
        })
    }

    /// Route every event `future` emits to this test's log, on whichever
    /// thread it is polled.
    pub fn scope<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for an additional log file in the test's directory.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// See [`log_location`].
    pub fn location(&self) -> &str {
        &self.location
    }
}
