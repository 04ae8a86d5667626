//! Moving files to and from VMs.

use std::time::Duration;

use opsprobe_core::CallContext;
use opsprobe_core::Vm;
use tracing::info;
use tracing::warn;

use super::RemoteExecutor;
use super::wrap;
use crate::error::ExecError;
use crate::error::Result;
use crate::runner::CommandOutput;
use crate::transfer::transfer_object_name;

/// Budget for removing a staged object after a transfer.
const STAGED_OBJECT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Release of the Cloud SDK installed on guests without `gsutil`.
const CLOUD_SDK_RELEASE: &str = "google-cloud-cli-453.0.0-linux";

impl RemoteExecutor {
    /// Write `content` to `remote_path` on `vm`.
    ///
    /// The bytes are staged in the transfer bucket and pulled by the VM. The
    /// staged object is always deleted; a deletion failure is reported
    /// alongside any transfer failure.
    pub async fn upload_content(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        content: &[u8],
        remote_path: &str,
    ) -> Result<CommandOutput> {
        let object = transfer_object_name(&vm.name, remote_path);
        self.store.put(ctx, &self.bucket, &object, content.to_vec()).await?;

        let pulled = self.pull_object(ctx, vm, &object, remote_path).await;

        let cleanup_ctx = CallContext::detached_with_timeout(STAGED_OBJECT_CLEANUP_TIMEOUT);
        let deleted = self.store.delete(&cleanup_ctx, &self.bucket, &object).await;
        if let Err(e) = &deleted {
            warn!(vm = %vm.name, object = %object, error = %e, "failed to delete staged object");
        }

        match (pulled, deleted) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(primary), deleted) => Err(ExecError::with_cleanup(primary, deleted.err())),
        }
    }

    async fn pull_object(&self, ctx: &CallContext, vm: &Vm, object: &str, remote_path: &str) -> Result<CommandOutput> {
        if vm.is_windows() {
            let command = wrap::windows_pull_command(&self.bucket, object, remote_path);
            return self.run_remotely(ctx, vm, &command).await;
        }
        self.install_gsutil_if_needed(ctx, vm).await?;
        let command = wrap::linux_pull_command(&self.bucket, object, remote_path);
        self.run_remotely(ctx, vm, &command).await
    }

    /// Contents of `remote_path` on `vm`.
    pub async fn retrieve_content(&self, ctx: &CallContext, vm: &Vm, remote_path: &str) -> Result<String> {
        let command = if vm.is_windows() {
            format!("Get-Content -Path {} -Raw", wrap::quote_powershell(remote_path))
        } else {
            format!("sudo cat {}", wrap::quote_posix(remote_path))
        };
        Ok(self.run_remotely(ctx, vm, &command).await?.stdout)
    }

    /// Make sure `gsutil` exists on a Linux guest.
    ///
    /// Only SUSE images ship without it; anything else missing it is an
    /// error rather than a guess at a package manager.
    pub async fn install_gsutil_if_needed(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        if vm.is_windows() {
            return Ok(());
        }
        if self.run_remotely(ctx, vm, "sudo gsutil --version").await.is_ok() {
            return Ok(());
        }
        info!(vm = %vm.name, "gsutil not found, installing it");

        if !vm.os.is_suse() {
            return Err(ExecError::UnsupportedInstall {
                package: "gsutil".to_string(),
                target: vm.os.id.clone(),
            });
        }
        let spec = vm.image_spec.as_str();
        if vm.image_spec.is_arm() && spec.contains("sles-12") {
            return Err(ExecError::UnsupportedInstall {
                package: "gsutil".to_string(),
                target: spec.to_string(),
            });
        }

        let script = gsutil_install_script(vm.image_spec.is_arm(), spec.contains("sles-15"));
        self.run_remotely(ctx, vm, &script).await?;
        Ok(())
    }
}

fn install_from_tarball(package: &str) -> String {
    format!(
        r#"
curl -O https://dl.google.com/dl/cloudsdk/channels/rapid/downloads/{package}
INSTALL_DIR="$(readlink --canonicalize .)"
(
	INSTALL_LOG="$(mktemp)"
	sudo tar -xf {package} -C ${{INSTALL_DIR}}
	sudo --preserve-env ${{INSTALL_DIR}}/google-cloud-sdk/install.sh -q &>"${{INSTALL_LOG}}" || \
		EXIT_CODE=$?
	if [[ "${{EXIT_CODE-}}" ]]; then
		cat "${{INSTALL_LOG}}"
		exit "${{EXIT_CODE}}"
	fi
)"#
    )
}

/// ARM tarballs ship without Python, so ARM guests install python3.11 first
/// and run gsutil through a wrapper that selects it.
fn gsutil_install_script(arm: bool, sles15: bool) -> String {
    if !arm {
        let tarball = install_from_tarball(&format!("{CLOUD_SDK_RELEASE}-x86_64.tar.gz"));
        return format!(
            r#"set -ex
{tarball}

sudo ${{INSTALL_DIR}}/google-cloud-sdk/bin/gcloud components update --quiet

sudo ln -s ${{INSTALL_DIR}}/google-cloud-sdk/bin/gsutil /usr/bin/gsutil
"#
        );
    }

    let repo_setup = if sles15 {
        "sudo zypper --non-interactive addrepo -g -t YUM https://us-yum.pkg.dev/projects/cloud-ops-agents-artifacts-dev/google-cloud-monitoring-sles15-aarch64-test-vendor test-vendor
sudo rpm --import https://packages.cloud.google.com/yum/doc/yum-key.gpg https://packages.cloud.google.com/yum/doc/rpm-package-key.gpg
sudo zypper --non-interactive refresh test-vendor"
    } else {
        "sudo zypper --non-interactive refresh"
    };
    let tarball = install_from_tarball(&format!("{CLOUD_SDK_RELEASE}-arm.tar.gz"));
    format!(
        r#"set -ex
{repo_setup}
sudo zypper --non-interactive install python311 python3-certifi

export CLOUDSDK_PYTHON=/usr/bin/python3.11

{tarball}

sudo CLOUDSDK_PYTHON=/usr/bin/python3.11 ${{INSTALL_DIR}}/google-cloud-sdk/bin/gcloud components update --quiet

sudo tee /usr/bin/gsutil > /dev/null << EOF
#!/usr/bin/env bash
CLOUDSDK_PYTHON=/usr/bin/python3.11 ${{INSTALL_DIR}}/google-cloud-sdk/bin/gsutil "\$@"
EOF
sudo chmod a+x /usr/bin/gsutil
"#
    )
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use opsprobe_core::Os;

    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_linux_upload_pulls_and_deletes_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let remote = executor(fake_ssh(dir.path(), "true"), Arc::clone(&store));
        let vm = vm("debian-cloud:debian-12");

        remote.upload_content(&CallContext::background(), &vm, b"key: value\n", "/etc/agent.yaml").await.unwrap();

        assert_eq!(store.objects.lock().get("transfers/test-vm/etc/agent.yaml").unwrap(), b"key: value\n");
        assert_eq!(*store.deleted.lock(), ["transfers/test-vm/etc/agent.yaml"]);
        assert_eq!(recorded_commands(dir.path()), [
            "sudo gsutil --version",
            "sudo gsutil cp 'gs://transfers/test-vm/etc/agent.yaml' '/etc/agent.yaml'",
        ]);
    }

    #[tokio::test]
    async fn test_failed_pull_still_deletes_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let remote = executor(fake_ssh(dir.path(), "exit 1"), Arc::clone(&store));
        let mut vm = vm("debian-cloud:debian-12");
        vm.os = Os::new("debian");

        let err = remote.upload_content(&CallContext::background(), &vm, b"x", "/tmp/x").await.unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedInstall { .. }), "{err}");
        assert_eq!(*store.deleted.lock(), ["transfers/test-vm/tmp/x"]);
    }

    #[tokio::test]
    async fn test_retrieve_content() {
        let dir = tempfile::tempdir().unwrap();
        let remote = executor(fake_ssh(dir.path(), "printf 'line one'"), Arc::default());
        let content =
            remote.retrieve_content(&CallContext::background(), &vm("debian-cloud:debian-12"), "/var/log/x").await.unwrap();
        assert_eq!(content, "line one");
        assert_eq!(recorded_commands(dir.path()), ["sudo cat '/var/log/x'"]);
    }

    #[test]
    fn test_arm_install_uses_python311() {
        let script = gsutil_install_script(true, true);
        assert!(script.contains("python311"));
        assert!(script.contains("test-vendor"));
        assert!(script.contains("-arm.tar.gz"));
        assert!(!gsutil_install_script(false, false).contains("python311"));
    }
}
