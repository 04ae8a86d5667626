//! Per-distribution fixes applied once a guest is ready.
//!
//! Fresh images of some distributions have package managers that fight over
//! locks, flaky repositories or unregistered subscriptions. Each fix is
//! either required (a failure fails provisioning) or best effort (a failure
//! is only logged).

use opsprobe_core::CallContext;
use opsprobe_core::ErrorClass;
use opsprobe_core::LinuxFamily;
use opsprobe_core::Platform;
use opsprobe_core::RetryPolicy;
use opsprobe_core::Vm;
use opsprobe_core::retry;
use opsprobe_exec::ExecError;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::PrepareSlesSnafu;
use crate::error::RemediationSnafu;
use crate::error::Result;
use crate::harness::Harness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Remediation {
    /// Run one command.
    Command {
        step: &'static str,
        command: &'static str,
        required: bool,
    },
    /// Register with the SUSE update infrastructure and refresh zypper.
    PrepareSles,
}

impl Remediation {
    const fn best_effort(step: &'static str, command: &'static str) -> Self {
        Remediation::Command {
            step,
            command,
            required: false,
        }
    }

    const fn required(step: &'static str, command: &'static str) -> Self {
        Remediation::Command {
            step,
            command,
            required: true,
        }
    }
}

const ZYPPER_SILENT_TRIES: Remediation = Remediation::best_effort(
    "raising zypper download retries",
    "sudo sed -i -E 's/.*download.max_silent_tries.*/download.max_silent_tries = 5/g' /etc/zypp/zypp.conf",
);

const ZYPPER_LOCK_TIMEOUT: Remediation = Remediation::best_effort(
    "setting ZYPP_LOCK_TIMEOUT",
    "echo 'ZYPP_LOCK_TIMEOUT=300' | sudo tee -a /etc/environment",
);

const DISABLE_RHUI_REPOS: Remediation = Remediation::required(
    "disabling rhui repos",
    r#"sudo yum -y --disablerepo=rhui-rhel*-7-* install yum-utils && sudo yum-config-manager --disable "rhui-rhel*-7-*""#,
);

const STOP_JUPYTER: Remediation = Remediation::best_effort("stopping jupyter", "sudo service jupyter stop || true");

const DROP_BULLSEYE_BACKPORTS: Remediation = Remediation::required(
    "removing bullseye-backports",
    "sudo sed --in-place --regexp-extended 's/deb[^ ]* [^ ]+ bullseye-backports .*//' /etc/apt/sources.list",
);

const DPKG_LOCK_TIMEOUT: Remediation = Remediation::best_effort(
    "setting DPkg::Lock::Timeout",
    "echo 'DPkg::Lock::Timeout=300' | sudo tee /etc/dpkg/dpkg.cfg.d/cache-lock-timeout.cfg",
);

const SLES_REGISTER: &str = "sudo /usr/sbin/registercloudguest --force";
const SLES_REFRESH: &str = "sudo zypper --non-interactive --gpg-auto-import-keys refresh && \
                            sudo zypper --non-interactive install --force coreutils";

/// Remediations for `vm`, in the order they run.
///
/// SUSE handling follows the OS the guest reported; everything else follows
/// the image.
pub(crate) fn remediations(vm: &Vm) -> Vec<Remediation> {
    let mut steps = Vec::new();
    if vm.os.is_suse() {
        steps.push(ZYPPER_SILENT_TRIES);
    }
    if vm.os.is_sles() {
        steps.push(Remediation::PrepareSles);
    }
    if vm.os.is_suse() {
        steps.push(ZYPPER_LOCK_TIMEOUT);
    }
    match vm.platform {
        Platform::Linux(LinuxFamily::RhelSapHa7) => steps.push(DISABLE_RHUI_REPOS),
        Platform::Linux(LinuxFamily::Debian { dlvm: true }) => {
            steps.push(STOP_JUPYTER);
            steps.push(DROP_BULLSEYE_BACKPORTS);
        }
        _ => {}
    }
    if vm.image_spec.is_debian_based() {
        steps.push(DPKG_LOCK_TIMEOUT);
    }
    steps
}

impl Harness {
    pub(crate) async fn remediate(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        for remediation in remediations(vm) {
            match remediation {
                Remediation::PrepareSles => self.prepare_sles(ctx, vm).await?,
                Remediation::Command {
                    step,
                    command,
                    required,
                } => {
                    debug!(vm = %vm.name, step, "applying remediation");
                    match self.remote.run_remotely(ctx, vm, command).await {
                        Ok(_) => {}
                        Err(e) if required => {
                            return Err(e).context(RemediationSnafu { vm: &vm.name, step });
                        }
                        Err(e) => warn!(vm = %vm.name, step, error = %e, "best-effort remediation failed"),
                    }
                }
            }
        }
        Ok(())
    }

    /// Register the guest and make zypper usable. SLES images come up
    /// unregistered often enough that this is retried generously.
    async fn prepare_sles(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        info!(vm = %vm.name, "preparing SLES guest");
        self.retry_sles_step(
            ctx,
            vm,
            "registercloudguest",
            SLES_REGISTER,
            self.timings.sles_register_max_attempts,
            "sudo cat /var/log/cloudregister",
        )
        .await?;
        self.retry_sles_step(
            ctx,
            vm,
            "zypper refresh",
            SLES_REFRESH,
            self.timings.sles_refresh_max_attempts,
            "sudo cat /var/log/zypper.log",
        )
        .await
    }

    /// Retry `command`; on final failure, log `diagnostics` output.
    async fn retry_sles_step(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        step: &str,
        command: &str,
        max_attempts: u32,
        diagnostics: &str,
    ) -> Result<()> {
        let policy = RetryPolicy::constant(self.timings.sles_prepare_backoff).with_max_attempts(max_attempts);
        let result = retry(
            ctx,
            &policy,
            |_: &ExecError| ErrorClass::Retriable,
            |attempt_ctx, _| async move { self.remote.run_remotely(&attempt_ctx, vm, command).await.map(|_| ()) },
        )
        .await;

        if result.is_err() {
            match self.remote.run_remotely(ctx, vm, diagnostics).await {
                Ok(output) => warn!(vm = %vm.name, step, log = %output.stdout, "SLES preparation failed"),
                Err(e) => warn!(vm = %vm.name, step, error = %e, "SLES preparation failed; could not read its log"),
            }
        }
        result.context(PrepareSlesSnafu { vm: &vm.name, step })
    }
}

#[cfg(test)]
mod tests {
    use opsprobe_core::ImageSpec;
    use opsprobe_core::Os;

    use super::*;

    fn vm(image: &str, os: &str) -> Vm {
        let spec: ImageSpec = image.parse().unwrap();
        let mut vm = Vm::pending("vm".into(), "p".into(), "default".into(), spec, "z".into(), "e2-standard-4".into());
        vm.os = Os::new(os);
        vm
    }

    fn steps(vm: &Vm) -> Vec<&'static str> {
        remediations(vm)
            .into_iter()
            .map(|r| match r {
                Remediation::Command { step, .. } => step,
                Remediation::PrepareSles => "prepare sles",
            })
            .collect()
    }

    #[test]
    fn test_sles_steps() {
        assert_eq!(steps(&vm("suse-cloud:sles-15", "sles")), [
            "raising zypper download retries",
            "prepare sles",
            "setting ZYPP_LOCK_TIMEOUT",
        ]);
    }

    #[test]
    fn test_opensuse_skips_registration() {
        assert_eq!(steps(&vm("opensuse-cloud:opensuse-leap", "opensuse-leap")), [
            "raising zypper download retries",
            "setting ZYPP_LOCK_TIMEOUT",
        ]);
    }

    #[test]
    fn test_rhel7_sap_ha_disables_rhui() {
        let steps = remediations(&vm("rhel-sap-cloud:rhel-7-9-sap-ha", "rhel"));
        assert_eq!(steps, [DISABLE_RHUI_REPOS]);
    }

    #[test]
    fn test_dlvm_steps() {
        assert_eq!(steps(&vm("ml-images:common-gpu-debian-11-py310", "debian")), [
            "stopping jupyter",
            "removing bullseye-backports",
            "setting DPkg::Lock::Timeout",
        ]);
    }

    #[test]
    fn test_plain_images() {
        assert_eq!(steps(&vm("ubuntu-os-cloud:ubuntu-2204-lts", "ubuntu")), ["setting DPkg::Lock::Timeout"]);
        assert!(remediations(&vm("rocky-linux-cloud:rocky-linux-9", "rocky")).is_empty());
        assert!(remediations(&vm("windows-cloud:windows-2022", "windows")).is_empty());
    }
}
