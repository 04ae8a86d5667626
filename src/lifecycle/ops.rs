//! Everyday operations on a running VM.

use std::collections::BTreeMap;

use opsprobe_core::CallContext;
use opsprobe_core::Vm;
use opsprobe_core::constants::AGENT_SERVICES;
use opsprobe_exec::CommandOutput;
use snafu::ResultExt;
use tracing::info;

use super::parse::metadata_map;
use crate::error::GcloudSnafu;
use crate::error::HarnessError;
use crate::error::RemoteSnafu;
use crate::error::Result;
use crate::harness::Harness;

const GRPCURL_BUCKET_DIR: &str = "gs://ops-agents-public-buckets-vendored-deps/mirrored-content/grpcurl/v1.8.6";

/// systemd drop-in setting `env` for a service. Newlines stay escaped for
/// `echo -e`.
pub(crate) fn systemd_override(env: &BTreeMap<String, String>) -> String {
    let mut body = String::from("[Service]\\n");
    for (key, value) in env {
        body.push_str(&format!("Environment=\"{key}={value}\"\\n"));
    }
    body
}

/// `--tags=` value; tags themselves cannot contain the separator.
fn tags_flag(tags: &[String]) -> Result<String> {
    if let Some(tag) = tags.iter().find(|t| t.contains(',')) {
        return Err(HarnessError::InvalidTag { tag: tag.clone() });
    }
    Ok(format!("--tags={}", tags.join(",")))
}

fn grpcurl_install_command(vm: &Vm) -> String {
    if vm.is_windows() {
        format!(
            "gsutil cp {GRPCURL_BUCKET_DIR}/grpcurl_1.8.6_windows_x86_64.zip C:\\agentPlugin;\
             Expand-Archive -Path \"C:\\agentPlugin\\grpcurl_1.8.6_windows_x86_64.zip\" -DestinationPath \"C:\\\" -Force"
        )
    } else {
        let arch = if vm.image_spec.is_arm() { "arm64" } else { "x86_64" };
        format!(
            "sudo gsutil cp {GRPCURL_BUCKET_DIR}/grpcurl_1.8.6_linux_{arch}.tar.gz /tmp/agentPlugin && \
             sudo tar -xzf /tmp/agentPlugin/grpcurl_1.8.6_linux_{arch}.tar.gz --no-overwrite-dir -C /usr/local/bin"
        )
    }
}

impl Harness {
    /// Run `gcloud` once, naming the step in the error.
    pub(crate) async fn run_gcloud<S: AsRef<str>>(&self, ctx: &CallContext, what: &str, args: &[S]) -> Result<CommandOutput> {
        self.gcloud.run(ctx, args).await.context(GcloudSnafu { what })
    }

    /// `gcloud compute disks describe` for the VM's boot disk.
    pub async fn describe_vm_disk(&self, ctx: &CallContext, vm: &Vm) -> Result<CommandOutput> {
        let args = [
            "compute".to_string(),
            "disks".to_string(),
            "describe".to_string(),
            vm.name.clone(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            "--format=json".to_string(),
        ];
        self.run_gcloud(ctx, "describe boot disk", &args).await
    }

    /// Drop the VM's external address.
    pub async fn remove_external_ip(&self, ctx: &CallContext, vm: &Vm) -> Result<CommandOutput> {
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            "delete-access-config".to_string(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            vm.name.clone(),
            "--access-config-name=external-nat".to_string(),
        ];
        self.run_gcloud(ctx, "remove external IP", &args).await
    }

    /// Make `env` visible to the agent's services.
    ///
    /// Windows sets machine-wide variables; Linux writes a systemd drop-in
    /// per agent service. Services pick the values up on their next start.
    pub async fn set_environment_variables(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        info!(vm = %vm.name, variables = env.len(), "setting environment variables");
        if vm.is_windows() {
            for (key, value) in env {
                let command = format!("setx {key} \"{value}\" /M");
                self.remote.run_remotely(ctx, vm, &command).await.context(RemoteSnafu {
                    vm: &vm.name,
                    what: "setting environment variable",
                })?;
            }
            return Ok(());
        }

        let body = systemd_override(env);
        for service in AGENT_SERVICES {
            let dir = format!("/etc/systemd/system/{service}.service.d");
            let command = format!("sudo mkdir -p {dir} && echo -e '{body}' | sudo tee {dir}/override.conf");
            self.remote.run_remotely(ctx, vm, &command).await.context(RemoteSnafu {
                vm: &vm.name,
                what: "writing systemd override",
            })?;
        }
        self.remote
            .run_remotely(ctx, vm, "sudo systemctl daemon-reload")
            .await
            .context(RemoteSnafu {
                vm: &vm.name,
                what: "reloading systemd",
            })?;
        Ok(())
    }

    pub async fn add_tags(&self, ctx: &CallContext, vm: &Vm, tags: &[String]) -> Result<CommandOutput> {
        self.change_tags(ctx, vm, "add-tags", tags).await
    }

    pub async fn remove_tags(&self, ctx: &CallContext, vm: &Vm, tags: &[String]) -> Result<CommandOutput> {
        self.change_tags(ctx, vm, "remove-tags", tags).await
    }

    async fn change_tags(&self, ctx: &CallContext, vm: &Vm, verb: &str, tags: &[String]) -> Result<CommandOutput> {
        let tags = tags_flag(tags)?;
        info!(vm = %vm.name, verb, %tags, "changing network tags");
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            verb.to_string(),
            vm.name.clone(),
            format!("--zone={}", vm.zone),
            format!("--project={}", vm.project),
            tags,
        ];
        self.run_gcloud(ctx, verb, &args).await
    }

    /// Current instance metadata as a key/value map.
    pub async fn fetch_metadata(&self, ctx: &CallContext, vm: &Vm) -> Result<BTreeMap<String, String>> {
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            "describe".to_string(),
            vm.name.clone(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            "--format=json(metadata)".to_string(),
        ];
        let output = self.run_gcloud(ctx, "describe instance metadata", &args).await?;
        metadata_map(&output.stdout)
    }

    /// Make sure `grpcurl` is on the VM's path.
    pub async fn install_grpcurl_if_needed(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        let check = if vm.is_windows() { "Get-Command grpcurl" } else { "which grpcurl" };
        if self.remote.run_remotely(ctx, vm, check).await.is_ok() {
            return Ok(());
        }
        info!(vm = %vm.name, "grpcurl not found, installing it");
        self.remote
            .run_remotely(ctx, vm, &grpcurl_install_command(vm))
            .await
            .context(RemoteSnafu {
                vm: &vm.name,
                what: "installing grpcurl",
            })?;
        Ok(())
    }
}
