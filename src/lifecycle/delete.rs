//! Deleting VMs and managed instance groups.
//!
//! Deletion never takes the caller's context: it has to run even after a
//! test timed out or was cancelled, so each delete gets a fresh context
//! bounded only by its own timeout.

use opsprobe_core::CallContext;
use opsprobe_core::ManagedInstanceGroupVm;
use opsprobe_core::RetryPolicy;
use opsprobe_core::Vm;
use opsprobe_core::retry;
use opsprobe_core::verified::classify::classify_deletion_message;
use opsprobe_core::verified::classify::is_already_deleted;
use opsprobe_exec::ExecError;
use opsprobe_exec::Gcloud;
use snafu::ResultExt;
use tracing::info;
use tracing::warn;

use crate::error::DeleteSnafu;
use crate::error::HarnessError;
use crate::error::Result;
use crate::harness::Harness;
use crate::lifecycle::LifecycleTimings;

/// The parts of a managed instance group that exist and need deleting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MigResources {
    pub template: bool,
    pub group: bool,
    pub instance: bool,
}

impl MigResources {
    pub(crate) fn all() -> Self {
        Self {
            template: true,
            group: true,
            instance: true,
        }
    }

    pub(crate) fn is_empty(self) -> bool {
        !(self.template || self.group || self.instance)
    }
}

/// The clients deletion needs, detached from the [`Harness`] so a delete
/// can outlive the call that started it.
#[derive(Debug, Clone)]
pub(crate) struct Reaper {
    gcloud: Gcloud,
    timings: LifecycleTimings,
}

impl Reaper {
    /// Delete `vm`. A VM that was already deleted is left alone.
    pub(crate) async fn delete_instance(&self, vm: &mut Vm) -> Result<()> {
        if vm.already_deleted {
            info!(vm = %vm.name, "instance was already deleted, skipping delete");
            return Ok(());
        }
        let ctx = CallContext::detached_with_timeout(self.timings.delete_timeout);
        info!(vm = %vm.name, zone = %vm.zone, "deleting instance");
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            "delete".to_string(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            vm.name.clone(),
        ];
        self.delete_with_retry(&ctx, &vm.name, &args).await?;
        vm.already_deleted = true;
        Ok(())
    }

    /// Delete a managed instance group VM: its instance, the group and the
    /// template, in that order.
    pub(crate) async fn delete_managed_instance_group_vm(&self, mig: &mut ManagedInstanceGroupVm) -> Result<()> {
        if mig.already_deleted {
            info!(vm = %mig.name, "managed instance group was already deleted, skipping delete");
            return Ok(());
        }
        self.delete_mig_resources(mig, MigResources::all()).await
    }

    /// Delete the `existing` parts of `mig`.
    ///
    /// Every step is attempted even after an earlier one fails; the failures
    /// are reported together.
    pub(crate) async fn delete_mig_resources(
        &self,
        mig: &mut ManagedInstanceGroupVm,
        existing: MigResources,
    ) -> Result<()> {
        let ctx = CallContext::detached_with_timeout(self.timings.delete_timeout);
        let group = mig.group_name();
        let template = mig.template_name();
        let project = format!("--project={}", mig.project);
        let zone = format!("--zone={}", mig.zone);
        info!(vm = %mig.name, group = %group, ?existing, "deleting managed instance group");

        let mut steps: Vec<(String, Vec<String>)> = Vec::new();
        if existing.instance {
            let args = vec![
                "compute".to_string(),
                "instance-groups".to_string(),
                "managed".to_string(),
                "delete-instances".to_string(),
                group.clone(),
                format!("--instances={}", mig.name),
                project.clone(),
                zone.clone(),
            ];
            steps.push((mig.name.clone(), args));
        }
        if existing.group {
            let args = vec![
                "compute".to_string(),
                "instance-groups".to_string(),
                "managed".to_string(),
                "delete".to_string(),
                group.clone(),
                project.clone(),
                zone,
            ];
            steps.push((group, args));
        }
        if existing.template {
            let args = vec![
                "compute".to_string(),
                "instance-templates".to_string(),
                "delete".to_string(),
                template.clone(),
                project,
            ];
            steps.push((template, args));
        }

        let mut errors = Vec::new();
        for (name, args) in &steps {
            if let Err(e) = self.delete_with_retry(&ctx, name, args).await {
                warn!(vm = %mig.name, resource = %name, error = %e, "delete step failed");
                errors.push(e);
            }
        }

        match errors.len() {
            0 => {
                mig.already_deleted = true;
                Ok(())
            }
            1 => Err(errors.remove(0)),
            _ => Err(HarnessError::DeleteSteps {
                name: mig.name.clone(),
                errors,
            }),
        }
    }

    /// Run one `gcloud ... delete` until it succeeds or fails permanently.
    ///
    /// "not found" after a failed first attempt means that attempt deleted
    /// the resource anyway.
    async fn delete_with_retry(&self, ctx: &CallContext, name: &str, args: &[String]) -> Result<()> {
        let policy = RetryPolicy::constant(self.timings.delete_backoff)
            .with_max_attempts(self.timings.delete_max_retries.saturating_add(1));
        retry(
            ctx,
            &policy,
            |e: &ExecError| classify_deletion_message(&e.to_string()),
            |attempt_ctx, attempt| async move {
                match self.gcloud.run(&attempt_ctx, args).await {
                    Ok(_) => Ok(()),
                    Err(e) if is_already_deleted(&e.to_string(), attempt) => {
                        info!(resource = %name, attempt, "resource already gone");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            },
        )
        .await
        .context(DeleteSnafu { name })
    }
}

impl Harness {
    pub(crate) fn reaper(&self) -> Reaper {
        Reaper {
            gcloud: self.gcloud.clone(),
            timings: self.timings.clone(),
        }
    }

    /// Delete `vm`. A VM that was already deleted is left alone.
    pub async fn delete_instance(&self, vm: &mut Vm) -> Result<()> {
        self.reaper().delete_instance(vm).await
    }

    /// Delete a managed instance group VM: its instance, the group and the
    /// template, in that order.
    pub async fn delete_managed_instance_group_vm(&self, mig: &mut ManagedInstanceGroupVm) -> Result<()> {
        self.reaper().delete_managed_instance_group_vm(mig).await
    }

    pub(crate) async fn delete_mig_resources(
        &self,
        mig: &mut ManagedInstanceGroupVm,
        existing: MigResources,
    ) -> Result<()> {
        self.reaper().delete_mig_resources(mig, existing).await
    }
}
