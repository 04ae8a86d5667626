//! Error types for the harness facade and the VM lifecycle.

use std::path::PathBuf;

use opsprobe_backend::QueryError;
use opsprobe_core::ConfigError;
use opsprobe_core::ErrorClass;
use opsprobe_core::ImageSpec;
use opsprobe_core::RetryError;
use opsprobe_core::verified::classify::classify_mig_provisioning_message;
use opsprobe_core::verified::classify::classify_provisioning_message;
use opsprobe_core::verified::ZoneSpecError;
use opsprobe_core::vm::VmOptionsError;
use opsprobe_exec::ExecError;
use snafu::Snafu;

/// Result type for harness operations.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)] // Snafu errors are documented via display attributes
pub enum HarnessError {
    #[snafu(display("invalid harness configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("invalid ZONES value: {source}"))]
    Zones { source: ZoneSpecError },

    #[snafu(display("invalid VM options: {source}"))]
    Options { source: VmOptionsError },

    #[snafu(display("IMAGE_SPECS must be non-empty"))]
    NoImageSpecs,

    #[snafu(display("failed to set up ssh keys: {source}"))]
    SshKeys { source: ExecError },

    #[snafu(display("failed to create the object store client: {source}"))]
    ObjectStore { source: ExecError },

    #[snafu(display("failed to create backend clients: {source}"))]
    Backends { source: QueryError },

    /// A single `gcloud` invocation failed.
    #[snafu(display("{what} failed: {source}"))]
    Gcloud { what: String, source: ExecError },

    /// A command on a VM failed outside of any retry loop.
    #[snafu(display("{what} on {vm} failed: {source}"))]
    Remote { vm: String, what: String, source: ExecError },

    #[snafu(display("could not interpret instance description: {reason}"))]
    InstanceDescription { reason: String },

    /// Every provisioning attempt failed, or one failed permanently.
    #[snafu(display("creating a VM from {image} failed: {source}"))]
    Create {
        image: String,
        #[snafu(source(from(RetryError<HarnessError>, Box::new)))]
        source: Box<RetryError<HarnessError>>,
    },

    #[snafu(display("{vm}: waiting for startup timed out: {source}"))]
    LinuxStartupTimedOut { vm: String, source: RetryError<ExecError> },

    #[snafu(display("{vm}: ran out of attempts waiting for a dummy command to run: {source}"))]
    WindowsStartupFailed { vm: String, source: RetryError<ExecError> },

    #[snafu(display("{vm}: exceeded retries trying to get sudo: {source}"))]
    SudoNotReady { vm: String, source: RetryError<ExecError> },

    #[snafu(display("{vm}: preparing SLES failed at {step}: {source}"))]
    PrepareSles {
        vm: String,
        step: String,
        source: RetryError<ExecError>,
    },

    #[snafu(display("{vm}: {step} failed: {source}"))]
    Remediation { vm: String, step: String, source: ExecError },

    #[snafu(display("failed to delete {name}: {source}"))]
    Delete { name: String, source: RetryError<ExecError> },

    #[snafu(display("failed to delete {name}: {}", join_errors(errors)))]
    DeleteSteps { name: String, errors: Vec<HarnessError> },

    #[snafu(display("failed to start {name}: {source}"))]
    Start { name: String, source: RetryError<ExecError> },

    /// A failure after a cloud resource existed, plus a failure deleting it.
    #[snafu(display("{primary}\nadditionally, cleanup failed: {cleanup}"))]
    CleanupFailed {
        primary: Box<HarnessError>,
        cleanup: Box<HarnessError>,
    },

    #[snafu(display("tag {tag:?} contains a comma"))]
    InvalidTag { tag: String },

    #[snafu(display("failed to prepare log directory {}: {source}", path.display()))]
    LogDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("{} image(s) failed: {}", failures.len(), join_failures(failures)))]
    ImageFailures { failures: Vec<(String, String)> },
}

fn join_errors(errors: &[HarnessError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

fn join_failures(failures: &[(String, String)]) -> String {
    failures.iter().map(|(image, error)| format!("{image}: {error}")).collect::<Vec<_>>().join("; ")
}

impl HarnessError {
    /// Attach a cleanup failure, if there was one, to a primary failure.
    pub fn with_cleanup(primary: HarnessError, cleanup: Option<HarnessError>) -> HarnessError {
        match cleanup {
            Some(cleanup) => HarnessError::CleanupFailed {
                primary: Box::new(primary),
                cleanup: Box::new(cleanup),
            },
            None => primary,
        }
    }

    /// Whether a failed provisioning attempt is worth another try.
    ///
    /// Readiness failures on images known to boot slowly are retried with a
    /// fresh VM; everything else falls back to the provisioning messages.
    pub fn classify_provisioning(&self, image: &ImageSpec, managed_group: bool) -> ErrorClass {
        match self {
            HarnessError::CleanupFailed { primary, .. } => primary.classify_provisioning(image, managed_group),
            HarnessError::LinuxStartupTimedOut { .. } if image.is_suse() => ErrorClass::Retriable,
            HarnessError::WindowsStartupFailed { .. } if image.is_windows_core() => ErrorClass::Retriable,
            HarnessError::PrepareSles { .. } => ErrorClass::Retriable,
            other => {
                let message = other.to_string();
                if managed_group {
                    classify_mig_provisioning_message(&message)
                } else {
                    classify_provisioning_message(&message)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use opsprobe_core::DoneReason;

    use super::*;

    fn spec(s: &str) -> ImageSpec {
        s.parse().unwrap()
    }

    fn startup_timeout() -> HarnessError {
        HarnessError::LinuxStartupTimedOut {
            vm: "vm-1".into(),
            source: RetryError::Interrupted {
                attempts: 30,
                reason: DoneReason::DeadlineExceeded,
                last: None,
            },
        }
    }

    #[test]
    fn test_suse_startup_timeouts_are_retried() {
        let err = startup_timeout();
        assert!(err.classify_provisioning(&spec("suse-cloud:sles-15"), false).is_retriable());
        assert!(!err.classify_provisioning(&spec("debian-cloud:debian-12"), false).is_retriable());
    }

    #[test]
    fn test_windows_core_startup_failures_are_retried() {
        let err = HarnessError::WindowsStartupFailed {
            vm: "vm-1".into(),
            source: RetryError::Interrupted {
                attempts: 3,
                reason: DoneReason::DeadlineExceeded,
                last: None,
            },
        };
        assert!(err.classify_provisioning(&spec("windows-cloud:windows-2022-core"), false).is_retriable());
        assert!(!err.classify_provisioning(&spec("windows-cloud:windows-2022"), false).is_retriable());
    }

    #[test]
    fn test_cleanup_failure_classified_by_primary() {
        let err = HarnessError::with_cleanup(
            startup_timeout(),
            Some(HarnessError::InvalidTag { tag: "a,b".into() }),
        );
        assert!(err.classify_provisioning(&spec("suse-cloud:sles-12"), false).is_retriable());
    }

    #[test]
    fn test_group_stabilization_timeout_only_retried_for_groups() {
        let err = HarnessError::InstanceDescription {
            reason: "Timeout while waiting for group to become stable.".into(),
        };
        let image = spec("debian-cloud:debian-12");
        assert!(err.classify_provisioning(&image, true).is_retriable());
        assert!(!err.classify_provisioning(&image, false).is_retriable());
    }
}
