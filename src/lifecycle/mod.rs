//! VM lifecycle: provisioning, readiness, remediation, power and deletion.
//!
//! Every operation here is a method on [`Harness`](crate::Harness), split
//! across submodules by concern:
//!
//! - `create`: single VMs and managed instance groups, with cleanup on failure
//! - `readiness`: waiting for the guest to accept commands, OS detection
//! - `remediation`: per-distribution fixes applied after readiness
//! - `delete`: retried deletion under a detached context
//! - `guard`: deleting a test's VM after its body returns, panics or is dropped
//! - `power`: stop, start and restart
//! - `ops`: tags, metadata, environment variables and helper tools

mod args;
mod create;
mod delete;
mod guard;
mod ops;
mod parse;
mod power;
mod readiness;
mod remediation;

use std::time::Duration;

use opsprobe_core::ImageSpec;
use opsprobe_core::Vm;
use opsprobe_core::constants::SLES_PREPARE_BACKOFF;
use opsprobe_core::constants::SLES_REFRESH_MAX_ATTEMPTS;
use opsprobe_core::constants::SLES_REGISTER_MAX_ATTEMPTS;
use opsprobe_core::constants::SLES_STARTUP_DELAY;
use opsprobe_core::constants::SLES_SUDO_BACKOFF;
use opsprobe_core::constants::SLES_SUDO_MAX_ATTEMPTS;
use opsprobe_core::constants::SUSE_READINESS_MAX_WAIT;
use opsprobe_core::constants::VM_CREATE_BACKOFF;
use opsprobe_core::constants::VM_DELETE_BACKOFF;
use opsprobe_core::constants::VM_DELETE_MAX_RETRIES;
use opsprobe_core::constants::VM_DELETE_TIMEOUT;
use opsprobe_core::constants::VM_INIT_ATTEMPT_BUDGET;
use opsprobe_core::constants::VM_INIT_BACKOFF;
use opsprobe_core::constants::VM_INIT_POKE_SSH_TIMEOUT;
use opsprobe_core::constants::VM_INIT_TIMEOUT;
use opsprobe_core::constants::VM_START_BACKOFF;
use opsprobe_core::constants::VM_START_TIMEOUT;

pub use self::args::framework_labels;
pub use self::args::framework_metadata;
pub(crate) use self::delete::Reaper;
pub(crate) use self::guard::DeleteGuard;
pub(crate) use self::guard::Owned;

/// Every wait and attempt budget the lifecycle uses.
///
/// Defaults come from [`opsprobe_core::constants`]. Tests against fake
/// executables shorten them.
#[derive(Debug, Clone)]
pub struct LifecycleTimings {
    /// Budget for one provisioning attempt, readiness included.
    pub create_attempt_timeout: Duration,
    /// Provisioning attempts that fit in the overall budget.
    pub create_attempts: u32,
    pub create_backoff: Duration,
    pub init_backoff: Duration,
    pub init_poke_timeout: Duration,
    pub suse_readiness_max_wait: Duration,
    pub sles_startup_delay: Duration,
    pub sles_sudo_backoff: Duration,
    pub sles_sudo_max_attempts: u32,
    pub sles_prepare_backoff: Duration,
    pub sles_register_max_attempts: u32,
    pub sles_refresh_max_attempts: u32,
    pub start_timeout: Duration,
    pub start_backoff: Duration,
    pub delete_timeout: Duration,
    pub delete_backoff: Duration,
    /// Retries after the first delete attempt.
    pub delete_max_retries: u32,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            create_attempt_timeout: VM_INIT_TIMEOUT,
            create_attempts: VM_INIT_ATTEMPT_BUDGET,
            create_backoff: VM_CREATE_BACKOFF,
            init_backoff: VM_INIT_BACKOFF,
            init_poke_timeout: VM_INIT_POKE_SSH_TIMEOUT,
            suse_readiness_max_wait: SUSE_READINESS_MAX_WAIT,
            sles_startup_delay: SLES_STARTUP_DELAY,
            sles_sudo_backoff: SLES_SUDO_BACKOFF,
            sles_sudo_max_attempts: SLES_SUDO_MAX_ATTEMPTS,
            sles_prepare_backoff: SLES_PREPARE_BACKOFF,
            sles_register_max_attempts: SLES_REGISTER_MAX_ATTEMPTS,
            sles_refresh_max_attempts: SLES_REFRESH_MAX_ATTEMPTS,
            start_timeout: VM_START_TIMEOUT,
            start_backoff: VM_START_BACKOFF,
            delete_timeout: VM_DELETE_TIMEOUT,
            delete_backoff: VM_DELETE_BACKOFF,
            delete_max_retries: VM_DELETE_MAX_RETRIES,
        }
    }
}

impl LifecycleTimings {
    /// Overall provisioning budget across all attempts.
    pub fn create_total_timeout(&self) -> Duration {
        self.create_attempt_timeout * self.create_attempts
    }

    /// Readiness checks a SUSE guest gets before provisioning gives up on it.
    pub fn suse_readiness_attempts(&self) -> u32 {
        let backoff = self.init_backoff.as_millis().max(1);
        let retries = self.suse_readiness_max_wait.as_millis() / backoff;
        u32::try_from(retries).unwrap_or(u32::MAX).saturating_add(1)
    }
}

/// Where the guest's system log lives.
pub fn syslog_location(image: &ImageSpec) -> &'static str {
    if image.is_debian_based() {
        "/var/log/syslog"
    } else {
        "/var/log/messages"
    }
}

/// Cloud console link to the instance's logs.
pub fn instance_log_url(vm: &Vm) -> String {
    format!(
        "https://console.cloud.google.com/logs/viewer?resource=gce_instance%2Finstance_id%2F{}&project={}",
        vm.id, vm.project
    )
}
