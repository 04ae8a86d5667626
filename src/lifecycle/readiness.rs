//! Waiting for a new or restarted guest to accept commands.

use opsprobe_core::CallContext;
use opsprobe_core::ErrorClass;
use opsprobe_core::Os;
use opsprobe_core::RetryError;
use opsprobe_core::RetryPolicy;
use opsprobe_core::Vm;
use opsprobe_core::retry;
use opsprobe_exec::ExecError;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::HarnessError;
use crate::error::LinuxStartupTimedOutSnafu;
use crate::error::RemoteSnafu;
use crate::error::Result;
use crate::error::SudoNotReadySnafu;
use crate::error::WindowsStartupFailedSnafu;
use crate::harness::Harness;

const SYSTEM_STATE_COMMAND: &str = "systemctl is-system-running";

/// What `systemctl is-system-running` reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemState {
    Running,
    /// Booted, with at least one failed unit.
    Degraded,
    NotReady,
}

impl SystemState {
    pub(crate) fn parse(output: &str) -> Self {
        match output.trim() {
            "running" => SystemState::Running,
            "degraded" => SystemState::Degraded,
            _ => SystemState::NotReady,
        }
    }
}

impl Harness {
    /// Wait for readiness, detect the OS and apply remediations.
    pub(crate) async fn verify_vm(&self, ctx: &CallContext, vm: &mut Vm) -> Result<()> {
        self.wait_for_start(ctx, vm).await?;
        vm.os = self.get_os(ctx, vm).await?;
        info!(vm = %vm.name, os = %vm.os, "guest is ready");
        self.remediate(ctx, vm).await
    }

    /// Wait until `vm` accepts commands over ssh.
    pub async fn wait_for_start(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        if vm.is_windows() {
            self.wait_for_windows_start(ctx, vm).await
        } else {
            self.wait_for_linux_start(ctx, vm).await
        }
    }

    async fn wait_for_windows_start(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        let policy = RetryPolicy::constant(self.timings.init_backoff).with_attempt_timeout(self.timings.init_poke_timeout);
        retry(
            ctx,
            &policy,
            |_: &ExecError| ErrorClass::Retriable,
            |attempt_ctx, attempt| async move {
                debug!(vm = %vm.name, attempt, "poking windows guest");
                self.remote.run_remotely(&attempt_ctx, vm, "'foo'").await.map(|_| ())
            },
        )
        .await
        .context(WindowsStartupFailedSnafu { vm: &vm.name })
    }

    async fn wait_for_linux_start(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        let mut policy =
            RetryPolicy::constant(self.timings.init_backoff).with_attempt_timeout(self.timings.init_poke_timeout);
        // SUSE guests that are slow to boot are replaced rather than waited on.
        if vm.platform.is_suse() {
            policy = policy.with_max_attempts(self.timings.suse_readiness_attempts());
        }

        retry(
            ctx,
            &policy,
            |_: &ExecError| ErrorClass::Retriable,
            |attempt_ctx, attempt| async move { self.probe_system_state(&attempt_ctx, vm, attempt).await },
        )
        .await
        .context(LinuxStartupTimedOutSnafu { vm: &vm.name })?;

        if vm.platform.is_suse() {
            self.wait_for_sudo(ctx, vm).await?;
        }
        Ok(())
    }

    async fn probe_system_state(&self, ctx: &CallContext, vm: &Vm, attempt: u32) -> Result<(), ExecError> {
        // A degraded system exits non-zero, so the state is read from either
        // outcome.
        let (state, failure) = match self.remote.run_remotely(ctx, vm, SYSTEM_STATE_COMMAND).await {
            Ok(output) => (SystemState::parse(&output.stdout), None),
            Err(e) => (e.output().map(|o| SystemState::parse(&o.stdout)).unwrap_or(SystemState::NotReady), Some(e)),
        };
        debug!(vm = %vm.name, attempt, ?state, "system state");

        match (state, failure) {
            (SystemState::Running, _) => Ok(()),
            (SystemState::Degraded, _) => {
                match self.remote.run_remotely(ctx, vm, "systemctl --failed").await {
                    Ok(output) => warn!(vm = %vm.name, failed_units = %output.stdout, "system is degraded"),
                    Err(e) => warn!(vm = %vm.name, error = %e, "system is degraded; could not list failed units"),
                }
                Ok(())
            }
            (SystemState::NotReady, Some(e)) => Err(e),
            (SystemState::NotReady, None) => Err(ExecError::UnexpectedOutput {
                command: SYSTEM_STATE_COMMAND.to_string(),
                reason: "system is not running yet".to_string(),
            }),
        }
    }

    /// SUSE guests report ready before `sudo` works.
    async fn wait_for_sudo(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        debug!(vm = %vm.name, delay = ?self.timings.sles_startup_delay, "letting SUSE guest settle");
        if let Err(reason) = ctx.sleep(self.timings.sles_startup_delay).await {
            return Err(HarnessError::SudoNotReady {
                vm: vm.name.clone(),
                source: RetryError::Interrupted {
                    attempts: 0,
                    reason,
                    last: None,
                },
            });
        }

        let policy =
            RetryPolicy::constant(self.timings.sles_sudo_backoff).with_max_attempts(self.timings.sles_sudo_max_attempts);
        retry(
            ctx,
            &policy,
            |_: &ExecError| ErrorClass::Retriable,
            |attempt_ctx, _| async move { self.remote.run_remotely(&attempt_ctx, vm, "sudo ls /root").await.map(|_| ()) },
        )
        .await
        .context(SudoNotReadySnafu { vm: &vm.name })
    }

    /// The guest OS: `windows`, or the `ID` from `/etc/os-release`.
    pub async fn get_os(&self, ctx: &CallContext, vm: &Vm) -> Result<Os> {
        if vm.is_windows() {
            return Ok(Os::windows());
        }
        let output = self
            .remote
            .run_remotely(ctx, vm, ". /etc/os-release && echo -n $ID")
            .await
            .context(RemoteSnafu {
                vm: &vm.name,
                what: "reading /etc/os-release",
            })?;
        Ok(Os::new(output.stdout.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_state() {
        assert_eq!(SystemState::parse("running\n"), SystemState::Running);
        assert_eq!(SystemState::parse("degraded"), SystemState::Degraded);
        assert_eq!(SystemState::parse("starting"), SystemState::NotReady);
        assert_eq!(SystemState::parse(""), SystemState::NotReady);
    }
}
