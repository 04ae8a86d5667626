//! Deleting a test's VM however its body ends.
//!
//! A body that returns hands the VM back to [`DeleteGuard::finish`], which
//! deletes it before reporting. A body that panics is caught, the VM is
//! deleted, and the panic resumes. A body dropped mid-flight (an outer
//! timeout, a cancelled task) leaves the guard to delete the VM from `Drop`
//! on a background task.

use opsprobe_core::ManagedInstanceGroupVm;
use opsprobe_core::Vm;
use tracing::info;
use tracing::warn;

use super::Reaper;
use crate::error::Result;

/// The cloud resource a guard is responsible for.
#[derive(Debug)]
pub(crate) enum Owned {
    Instance(Vm),
    Group(ManagedInstanceGroupVm),
}

impl Owned {
    fn name(&self) -> &str {
        match self {
            Owned::Instance(vm) => &vm.name,
            Owned::Group(mig) => &mig.name,
        }
    }

    async fn delete(&mut self, reaper: &Reaper) -> Result<()> {
        match self {
            Owned::Instance(vm) => reaper.delete_instance(vm).await,
            Owned::Group(mig) => reaper.delete_managed_instance_group_vm(mig).await,
        }
    }
}

/// Deletes its resource unless [`finish`](Self::finish) already did.
#[derive(Debug)]
pub(crate) struct DeleteGuard {
    reaper: Reaper,
    owned: Option<Owned>,
}

impl DeleteGuard {
    pub(crate) fn new(reaper: Reaper, owned: Owned) -> Self {
        Self {
            reaper,
            owned: Some(owned),
        }
    }

    /// Delete the resource, then report the body's outcome.
    ///
    /// A panic from the body is resumed after the delete. Otherwise a delete
    /// failure replaces the body's value.
    pub(crate) async fn finish<T>(mut self, outcome: std::thread::Result<T>) -> Result<T> {
        let deleted = match self.owned.take() {
            Some(mut owned) => {
                let result = owned.delete(&self.reaper).await;
                if let Err(e) = &result {
                    warn!(vm = %owned.name(), error = %e, "failed to delete VM after test");
                }
                result
            }
            None => Ok(()),
        };

        match outcome {
            Err(panic) => {
                info!("test body panicked, VM cleanup done, resuming panic");
                std::panic::resume_unwind(panic)
            }
            Ok(value) => deleted.map(|()| value),
        }
    }
}

impl Drop for DeleteGuard {
    fn drop(&mut self) {
        let Some(mut owned) = self.owned.take() else {
            return;
        };
        warn!(vm = %owned.name(), "test body dropped before finishing, deleting VM in the background");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let reaper = self.reaper.clone();
                handle.spawn(async move {
                    match owned.delete(&reaper).await {
                        Ok(()) => info!(vm = %owned.name(), "background delete finished"),
                        Err(e) => warn!(vm = %owned.name(), error = %e, "background delete failed"),
                    }
                });
            }
            Err(_) => warn!(vm = %owned.name(), "no runtime left to delete VM on, it is leaked"),
        }
    }
}
