//! Command execution for the opsprobe harness.
//!
//! - [`runner`]: local subprocesses with interleaved output capture and
//!   process-group termination on cancellation
//! - [`gcloud`]: the provisioning CLI, its configuration directories and
//!   access tokens
//! - [`ssh`]: the per-run key pair and client options
//! - [`remote`]: commands, scripts and files on VMs
//! - [`transfer`]: the bucket used to stage files for VMs

pub mod error;
pub mod gcloud;
pub mod remote;
pub mod runner;
pub mod ssh;
pub mod transfer;

pub use error::ExecError;
pub use error::Result;
pub use gcloud::AccessTokenSource;
pub use gcloud::Gcloud;
pub use remote::RemoteExecutor;
pub use runner::CommandOutput;
pub use runner::run_command;
pub use ssh::SshKeyPair;
pub use transfer::GcsObjectStore;
pub use transfer::ObjectStore;
