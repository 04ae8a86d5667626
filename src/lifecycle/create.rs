//! Provisioning single VMs and single-instance managed instance groups.

use opsprobe_core::CallContext;
use opsprobe_core::ImageSpec;
use opsprobe_core::ManagedInstanceGroupVm;
use opsprobe_core::RetryPolicy;
use opsprobe_core::Vm;
use opsprobe_core::VmOptions;
use opsprobe_core::constants::DEFAULT_ARM_MACHINE_TYPE;
use opsprobe_core::constants::DEFAULT_IMAGE_FAMILY_SCOPE;
use opsprobe_core::constants::DEFAULT_MACHINE_TYPE;
use opsprobe_core::constants::MIG_STABLE_TIMEOUT_SECS;
use opsprobe_core::constants::SSH_USER_NAME;
use opsprobe_core::retry;
use opsprobe_core::vm::instance_name;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::args::framework_labels;
use super::args::framework_metadata;
use super::args::provisioning_flags;
use super::delete::MigResources;
use super::instance_log_url;
use super::parse::single_instance;
use crate::error::CreateSnafu;
use crate::error::HarnessError;
use crate::error::OptionsSnafu;
use crate::error::Result;
use crate::harness::Harness;

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl Harness {
    /// Create a VM and wait until it accepts commands.
    ///
    /// Attempts that fail after the instance exists delete it before the next
    /// attempt starts. Each attempt picks a fresh zone and, unless the
    /// options name the VM, a fresh name.
    pub async fn create_instance(&self, ctx: &CallContext, options: &VmOptions) -> Result<Vm> {
        let image = options.validate().context(OptionsSnafu)?;
        let flags = self.creation_flags(options, &image)?;

        retry(
            ctx,
            &self.provisioning_policy(),
            |e: &HarnessError| e.classify_provisioning(&image, false),
            |attempt_ctx, attempt| self.attempt_create_instance(attempt_ctx, options, &image, &flags, attempt),
        )
        .await
        .context(CreateSnafu {
            image: image.to_string(),
        })
    }

    /// Create a VM owned by a single-instance managed instance group.
    pub async fn create_managed_instance_group_vm(
        &self,
        ctx: &CallContext,
        options: &VmOptions,
    ) -> Result<ManagedInstanceGroupVm> {
        let image = options.validate().context(OptionsSnafu)?;
        let flags = self.creation_flags(options, &image)?;

        retry(
            ctx,
            &self.provisioning_policy(),
            |e: &HarnessError| e.classify_provisioning(&image, true),
            |attempt_ctx, attempt| self.attempt_create_mig(attempt_ctx, options, &image, &flags, attempt),
        )
        .await
        .context(CreateSnafu {
            image: image.to_string(),
        })
    }

    fn provisioning_policy(&self) -> RetryPolicy {
        RetryPolicy::constant(self.timings.create_backoff)
            .with_total_timeout(self.timings.create_total_timeout())
            .with_attempt_timeout(self.timings.create_attempt_timeout)
    }

    /// Flags shared by every attempt. Reserved metadata keys fail here,
    /// before anything is created.
    fn creation_flags(&self, options: &VmOptions, image: &ImageSpec) -> Result<Vec<String>> {
        let ssh_entry = self.remote.keys().metadata_entry(SSH_USER_NAME);
        let metadata = framework_metadata(image, &options.metadata, &ssh_entry).context(OptionsSnafu)?;
        let labels = framework_labels(&self.config, &options.labels);
        Ok(provisioning_flags(&self.config, options, image, &metadata, &labels))
    }

    /// A VM record with every default filled in.
    pub(crate) fn pending_vm(&self, options: &VmOptions, image: &ImageSpec, name: String) -> Vm {
        let project = non_empty(&options.project).unwrap_or(&self.config.project).to_string();
        let zone = match non_empty(&options.zone) {
            Some(zone) => zone.to_string(),
            None => self.zones.next().to_string(),
        };
        let machine_type = non_empty(&self.config.instance_size)
            .or_else(|| non_empty(&options.machine_type))
            .unwrap_or(if image.is_arm() {
                DEFAULT_ARM_MACHINE_TYPE
            } else {
                DEFAULT_MACHINE_TYPE
            })
            .to_string();
        Vm::pending(name, project, self.config.network.clone(), image.clone(), zone, machine_type)
    }

    async fn attempt_create_instance(
        &self,
        ctx: CallContext,
        options: &VmOptions,
        image: &ImageSpec,
        flags: &[String],
        attempt: u32,
    ) -> Result<Vm> {
        let name = match non_empty(&options.name) {
            Some(name) => name.to_string(),
            None => instance_name(&self.sandbox_prefix, false),
        };
        let mut vm = self.pending_vm(options, image, name);
        info!(
            vm = %vm.name,
            zone = %vm.zone,
            machine_type = %vm.machine_type,
            image = %image,
            attempt,
            "creating instance"
        );

        let scope = non_empty(&options.image_family_scope).unwrap_or(DEFAULT_IMAGE_FAMILY_SCOPE);
        let mut args = vec![
            "beta".to_string(),
            "compute".to_string(),
            "instances".to_string(),
            "create".to_string(),
            vm.name.clone(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            format!("--machine-type={}", vm.machine_type),
            format!("--image-family-scope={scope}"),
            format!("--network={}", vm.network),
            "--format=json".to_string(),
        ];
        args.extend_from_slice(flags);

        // Nothing exists yet if the create call itself fails.
        let output = self.run_gcloud(&ctx, "create instance", &args).await?;

        if let Err(primary) = self.finish_provisioning(&ctx, &mut vm, &output.stdout).await {
            warn!(vm = %vm.name, error = %primary, "instance failed after creation, deleting it");
            let cleanup = self.delete_instance(&mut vm).await.err();
            return Err(HarnessError::with_cleanup(primary, cleanup));
        }
        Ok(vm)
    }

    async fn attempt_create_mig(
        &self,
        ctx: CallContext,
        options: &VmOptions,
        image: &ImageSpec,
        flags: &[String],
        attempt: u32,
    ) -> Result<ManagedInstanceGroupVm> {
        // Group and template names extend the instance name; keep it short.
        let name = instance_name(&self.sandbox_prefix, true);
        let mut mig = ManagedInstanceGroupVm::new(self.pending_vm(options, image, name));
        info!(
            vm = %mig.name,
            group = %mig.group_name(),
            zone = %mig.zone,
            attempt,
            "creating managed instance group VM"
        );

        let mut created = MigResources::default();
        if let Err(primary) = self.provision_mig(&ctx, &mut mig, flags, &mut created).await {
            if created.is_empty() {
                return Err(primary);
            }
            warn!(vm = %mig.name, error = %primary, ?created, "managed instance group failed, deleting what was created");
            let cleanup = self.delete_mig_resources(&mut mig, created).await.err();
            return Err(HarnessError::with_cleanup(primary, cleanup));
        }
        Ok(mig)
    }

    async fn provision_mig(
        &self,
        ctx: &CallContext,
        mig: &mut ManagedInstanceGroupVm,
        flags: &[String],
        created: &mut MigResources,
    ) -> Result<()> {
        let template = mig.template_name();
        let group = mig.group_name();
        let project = format!("--project={}", mig.project);
        let zone = format!("--zone={}", mig.zone);

        let mut template_args = vec![
            "beta".to_string(),
            "compute".to_string(),
            "instance-templates".to_string(),
            "create".to_string(),
            template.clone(),
            project.clone(),
            format!("--machine-type={}", mig.machine_type),
            format!("--network={}", mig.network),
            "--format=json".to_string(),
        ];
        template_args.extend_from_slice(flags);
        self.run_gcloud(ctx, "create instance template", &template_args).await?;
        created.template = true;

        let group_args: [&str; 10] = [
            "compute",
            "instance-groups",
            "managed",
            "create",
            &group,
            &project,
            &zone,
            "--size=0",
            &format!("--template={template}"),
            "--format=json",
        ];
        self.run_gcloud(ctx, "create managed instance group", &group_args).await?;
        created.group = true;

        let instance_args: [&str; 9] = [
            "compute",
            "instance-groups",
            "managed",
            "create-instance",
            &group,
            &format!("--instance={}", mig.name),
            &project,
            &zone,
            "--format=json",
        ];
        self.run_gcloud(ctx, "create managed instance", &instance_args).await?;
        created.instance = true;

        let stable_args: [&str; 10] = [
            "compute",
            "instance-groups",
            "managed",
            "wait-until",
            &group,
            "--stable",
            &format!("--timeout={MIG_STABLE_TIMEOUT_SECS}"),
            &project,
            &zone,
            "--format=json",
        ];
        self.run_gcloud(ctx, "wait for managed instance group", &stable_args).await?;

        let list_args: [&str; 7] = [
            "compute",
            "instances",
            "list",
            &format!("--filter=name=( '{}' ... )", mig.name),
            &project,
            &format!("--zones={}", mig.zone),
            "--format=json",
        ];
        let output = self.run_gcloud(ctx, "list managed instance", &list_args).await?;
        self.finish_provisioning(ctx, &mut mig.vm, &output.stdout).await
    }

    /// Fill in ID and address from the create output, then wait for the
    /// guest to be usable.
    async fn finish_provisioning(&self, ctx: &CallContext, vm: &mut Vm, stdout: &str) -> Result<()> {
        let instance = single_instance(stdout)?;
        vm.id = instance.numeric_id()?;
        vm.ip_address = instance.ip_address(self.config.use_internal_ip)?;
        info!(vm = %vm.name, id = vm.id, ip = %vm.ip_address, logs = %instance_log_url(vm), "instance created");

        match self.describe_vm_disk(ctx, vm).await {
            Ok(disk) => debug!(vm = %vm.name, disk = %disk.stdout.trim(), "boot disk"),
            Err(e) => warn!(vm = %vm.name, error = %e, "unable to describe the boot disk"),
        }

        self.verify_vm(ctx, vm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(&None), None);
        assert_eq!(non_empty(&Some("  ".into())), None);
        assert_eq!(non_empty(&Some("n2-standard-2".into())), Some("n2-standard-2"));
    }
}
