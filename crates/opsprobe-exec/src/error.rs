//! Error types for local and remote command execution.

use opsprobe_core::DoneReason;
use snafu::Snafu;

use crate::runner::CommandOutput;

/// Result type for execution operations.
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

/// Errors from running commands locally, on VMs, or moving files to VMs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)] // Snafu errors are documented via display attributes
pub enum ExecError {
    /// No program was given.
    #[snafu(display("cannot run an empty command"))]
    EmptyCommand,

    /// The program could not be started.
    #[snafu(display("failed to spawn {command}: {source}"))]
    Spawn { command: String, source: std::io::Error },

    /// Waiting on the process failed.
    #[snafu(display("failed to wait for {command}: {source}"))]
    Wait { command: String, source: std::io::Error },

    /// Non-zero exit. The captured output is kept for the caller.
    #[snafu(display("Command failed: {command}\nexit code {exit_code}\nstdout+stderr: {interleaved}"))]
    CommandFailed {
        command: String,
        exit_code: i32,
        interleaved: String,
        output: CommandOutput,
    },

    /// The call context finished before the process did.
    #[snafu(display("{command} stopped: {reason}"))]
    Interrupted {
        command: String,
        reason: DoneReason,
        output: CommandOutput,
    },

    /// A command run on a VM failed.
    #[snafu(display("Command failed on {vm}: {command}\n{source}"))]
    Remote {
        vm: String,
        command: String,
        #[snafu(source(from(ExecError, Box::new)))]
        source: Box<ExecError>,
    },

    /// Reading a generated key or other local file failed.
    #[snafu(display("failed to read {path}: {source}"))]
    ReadFile { path: String, source: std::io::Error },

    #[snafu(display("failed to create directory {path}: {source}"))]
    CreateDir { path: String, source: std::io::Error },

    #[snafu(display("failed to create temporary directory: {source}"))]
    TempDir { source: std::io::Error },

    /// A tool produced output the harness cannot interpret.
    #[snafu(display("unexpected output from {command}: {reason}"))]
    UnexpectedOutput { command: String, reason: String },

    /// Fetching an access token failed.
    #[snafu(display("failed to get an access token: {source}"))]
    AccessToken {
        #[snafu(source(from(ExecError, Box::new)))]
        source: Box<ExecError>,
    },

    #[snafu(display("object store request for gs://{bucket}/{object} failed: {source}"))]
    ObjectStoreRequest {
        bucket: String,
        object: String,
        source: reqwest::Error,
    },

    #[snafu(display("object store returned {status} for gs://{bucket}/{object}: {body}"))]
    ObjectStoreStatus {
        bucket: String,
        object: String,
        status: u16,
        body: String,
    },

    #[snafu(display("object store request for gs://{bucket}/{object} stopped: {reason}"))]
    ObjectStoreInterrupted {
        bucket: String,
        object: String,
        reason: DoneReason,
    },

    #[snafu(display("invalid object store URL: {source}"))]
    ObjectStoreUrl { source: url::ParseError },

    /// The guest has no known way to install a tool.
    #[snafu(display("this test does not know how to install {package} on {target}"))]
    UnsupportedInstall { package: String, target: String },

    /// A primary failure plus a failure while cleaning up after it.
    #[snafu(display("{primary}\nadditionally, cleanup failed: {cleanup}"))]
    WithCleanup {
        primary: Box<ExecError>,
        cleanup: Box<ExecError>,
    },
}

impl ExecError {
    /// Output captured before the failure, when a process ran at all.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ExecError::CommandFailed { output, .. } | ExecError::Interrupted { output, .. } => Some(output),
            ExecError::Remote { source, .. } => source.output(),
            ExecError::WithCleanup { primary, .. } => primary.output(),
            _ => None,
        }
    }

    /// Exit code of the failed process, if it exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { exit_code, .. } => Some(*exit_code),
            ExecError::Remote { source, .. } => source.exit_code(),
            ExecError::WithCleanup { primary, .. } => primary.exit_code(),
            _ => None,
        }
    }

    /// Whether the failure came from the caller's context ending.
    pub fn interrupted(&self) -> Option<DoneReason> {
        match self {
            ExecError::Interrupted { reason, .. } | ExecError::ObjectStoreInterrupted { reason, .. } => Some(*reason),
            ExecError::Remote { source, .. } | ExecError::AccessToken { source } => source.interrupted(),
            ExecError::WithCleanup { primary, .. } => primary.interrupted(),
            _ => None,
        }
    }

    /// Combine a primary failure with an optional cleanup failure.
    pub fn with_cleanup(primary: ExecError, cleanup: Option<ExecError>) -> ExecError {
        match cleanup {
            Some(cleanup) => ExecError::WithCleanup {
                primary: Box::new(primary),
                cleanup: Box::new(cleanup),
            },
            None => primary,
        }
    }
}
