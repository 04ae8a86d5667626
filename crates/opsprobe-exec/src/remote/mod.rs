//! Command execution on VMs over ssh.
//!
//! Raw `ssh` with a per-run key is used rather than `gcloud compute ssh`:
//! it runs reliably when many connections are opened concurrently and
//! leaves no keys behind in the project.

mod files;
mod script;
pub mod wrap;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use opsprobe_core::CallContext;
use opsprobe_core::Vm;
use opsprobe_core::constants::SSH_USER_NAME;
use snafu::ResultExt;
use tracing::debug;

use crate::error::RemoteSnafu;
use crate::error::Result;
use crate::runner::CommandOutput;
use crate::runner::run_command;
use crate::ssh::SshKeyPair;
use crate::ssh::ssh_options;
use crate::transfer::ObjectStore;

/// Runs commands and scripts on VMs and moves files onto them.
#[derive(Clone)]
pub struct RemoteExecutor {
    ssh_path: PathBuf,
    user: String,
    keys: Arc<SshKeyPair>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("ssh_path", &self.ssh_path)
            .field("user", &self.user)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl RemoteExecutor {
    pub fn new(
        ssh_path: impl Into<PathBuf>,
        keys: Arc<SshKeyPair>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            ssh_path: ssh_path.into(),
            user: SSH_USER_NAME.to_string(),
            keys,
            store,
            bucket: bucket.into(),
        }
    }

    pub fn keys(&self) -> &SshKeyPair {
        &self.keys
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Run `command` on `vm`. Windows commands are PowerShell.
    pub async fn run_remotely(&self, ctx: &CallContext, vm: &Vm, command: &str) -> Result<CommandOutput> {
        self.run(ctx, vm, command, None).await
    }

    /// Like [`run_remotely`](Self::run_remotely), feeding `stdin` to the command.
    pub async fn run_remotely_with_stdin(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        command: &str,
        stdin: &[u8],
    ) -> Result<CommandOutput> {
        self.run(ctx, vm, command, Some(stdin)).await
    }

    async fn run(&self, ctx: &CallContext, vm: &Vm, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
        debug!(vm = %vm.name, command, "running command remotely");
        let wrapped = if vm.is_windows() {
            wrap::encode_powershell(command)
        } else {
            command.to_string()
        };

        let mut args = vec![self.ssh_path.display().to_string(), format!("{}@{}", self.user, vm.ip_address)];
        args.extend(ssh_options(self.keys.private_key()));
        args.push(wrapped);

        run_command(ctx, &args, stdin, &BTreeMap::new()).await.context(RemoteSnafu {
            vm: vm.name.clone(),
            command,
        })
    }
}
