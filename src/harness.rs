//! The harness facade: configuration plus every shared client.
//!
//! One [`Harness`] is built per test binary and shared by its tests. It owns
//! the zone rotation, the per-run ssh key, the `gcloud` handle and the
//! backend clients, so tests only ever pass a [`CallContext`] and a VM.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use opsprobe_backend::BackendRegistry;
use opsprobe_backend::BackendWaiter;
use opsprobe_backend::WaitPolicies;
use opsprobe_core::CallContext;
use opsprobe_core::HarnessConfig;
use opsprobe_core::ManagedInstanceGroupVm;
use opsprobe_core::Vm;
use opsprobe_core::VmOptions;
use opsprobe_core::ZonePicker;
use opsprobe_core::constants::SSH_USER_NAME;
use opsprobe_core::vm::sandbox_prefix;
use opsprobe_exec::AccessTokenSource;
use opsprobe_exec::Gcloud;
use opsprobe_exec::GcsObjectStore;
use opsprobe_exec::ObjectStore;
use opsprobe_exec::RemoteExecutor;
use opsprobe_exec::SshKeyPair;
use snafu::ResultExt;
use tracing::info;

use crate::error::BackendsSnafu;
use crate::error::ConfigSnafu;
use crate::error::ObjectStoreSnafu;
use crate::error::Result;
use crate::error::SshKeysSnafu;
use crate::error::ZonesSnafu;
use crate::lifecycle::DeleteGuard;
use crate::lifecycle::LifecycleTimings;
use crate::lifecycle::Owned;

/// Shared state for every test in a binary.
#[derive(Debug)]
pub struct Harness {
    pub(crate) config: HarnessConfig,
    pub(crate) zones: ZonePicker,
    pub(crate) gcloud: Gcloud,
    pub(crate) remote: RemoteExecutor,
    pub(crate) waiter: BackendWaiter,
    pub(crate) timings: LifecycleTimings,
    pub(crate) sandbox_prefix: String,
}

impl Harness {
    /// Build a harness from the process environment with production clients.
    pub async fn from_env(ctx: &CallContext) -> Result<Self> {
        let config = HarnessConfig::load().context(ConfigSnafu)?;
        HarnessBuilder::new(config).build(ctx).await
    }

    pub fn builder(config: HarnessConfig) -> HarnessBuilder {
        HarnessBuilder::new(config)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZonePicker {
        &self.zones
    }

    pub fn gcloud(&self) -> &Gcloud {
        &self.gcloud
    }

    /// ssh command execution and file transfer onto VMs.
    pub fn remote(&self) -> &RemoteExecutor {
        &self.remote
    }

    /// Metric, log and trace waiters.
    pub fn backends(&self) -> &BackendWaiter {
        &self.waiter
    }

    pub fn timings(&self) -> &LifecycleTimings {
        &self.timings
    }

    /// Prefix shared by every VM name this harness creates.
    pub fn sandbox_prefix(&self) -> &str {
        &self.sandbox_prefix
    }

    /// Create a VM, run `body` against it and delete the VM afterwards,
    /// whatever `body` did.
    ///
    /// A deletion failure is returned in place of `body`'s output. A panic
    /// in `body` resumes once the VM is deleted. If this future is dropped
    /// before `body` finishes, the VM is deleted on a background task.
    pub async fn with_vm<T, F, Fut>(&self, ctx: &CallContext, options: &VmOptions, body: F) -> Result<T>
    where
        F: FnOnce(Vm) -> Fut,
        Fut: Future<Output = T>,
    {
        let vm = self.create_instance(ctx, options).await?;
        let guard = DeleteGuard::new(self.reaper(), Owned::Instance(vm.clone()));
        let outcome = AssertUnwindSafe(async move { body(vm).await }).catch_unwind().await;
        guard.finish(outcome).await
    }

    /// [`with_vm`](Self::with_vm) for a VM owned by a managed instance
    /// group. The instance, group and template are all deleted afterwards.
    pub async fn with_managed_instance_group_vm<T, F, Fut>(
        &self,
        ctx: &CallContext,
        options: &VmOptions,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(ManagedInstanceGroupVm) -> Fut,
        Fut: Future<Output = T>,
    {
        let mig = self.create_managed_instance_group_vm(ctx, options).await?;
        let guard = DeleteGuard::new(self.reaper(), Owned::Group(mig.clone()));
        let outcome = AssertUnwindSafe(async move { body(mig).await }).catch_unwind().await;
        guard.finish(outcome).await
    }
}

/// Builds a [`Harness`], with every outside-world client replaceable.
pub struct HarnessBuilder {
    config: HarnessConfig,
    ssh_keys: Option<SshKeyPair>,
    object_store: Option<Arc<dyn ObjectStore>>,
    backends: Option<Arc<BackendRegistry>>,
    gcloud_config_dir: Option<PathBuf>,
    timings: LifecycleTimings,
    wait_policies: WaitPolicies,
}

impl HarnessBuilder {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            ssh_keys: None,
            object_store: None,
            backends: None,
            gcloud_config_dir: None,
            timings: LifecycleTimings::default(),
            wait_policies: WaitPolicies::default(),
        }
    }

    /// Use an existing key pair instead of generating one.
    pub fn ssh_keys(mut self, keys: SshKeyPair) -> Self {
        self.ssh_keys = Some(keys);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn backends(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.backends = Some(registry);
        self
    }

    /// Run `gcloud` against a private configuration directory.
    pub fn gcloud_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.gcloud_config_dir = Some(dir.into());
        self
    }

    pub fn timings(mut self, timings: LifecycleTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn wait_policies(mut self, policies: WaitPolicies) -> Self {
        self.wait_policies = policies;
        self
    }

    pub async fn build(self, ctx: &CallContext) -> Result<Harness> {
        let config = self.config;
        config.validate().context(ConfigSnafu)?;
        let zones = ZonePicker::parse(&config.zones).context(ZonesSnafu)?;

        let mut gcloud = Gcloud::new(&config.gcloud_path);
        if let Some(dir) = self.gcloud_config_dir {
            gcloud = gcloud.with_config_dir(dir);
        }
        let tokens: Arc<dyn AccessTokenSource> = Arc::new(gcloud.clone());

        let keys = match self.ssh_keys {
            Some(keys) => keys,
            None => SshKeyPair::generate(ctx, &config.ssh_keygen_path, SSH_USER_NAME).await.context(SshKeysSnafu)?,
        };
        let store: Arc<dyn ObjectStore> = match self.object_store {
            Some(store) => store,
            None => Arc::new(GcsObjectStore::new(Arc::clone(&tokens)).context(ObjectStoreSnafu)?),
        };
        let registry = match self.backends {
            Some(registry) => registry,
            None => Arc::new(BackendRegistry::google(tokens).context(BackendsSnafu)?),
        };

        let remote = RemoteExecutor::new(&config.ssh_path, Arc::new(keys), store, config.transfers_bucket.clone());
        let waiter = BackendWaiter::new(registry).with_policies(self.wait_policies);
        let sandbox_prefix = sandbox_prefix(Utc::now(), config.vm_name_prefix.as_deref());

        info!(
            project = %config.project,
            zones = %config.zones,
            prefix = %sandbox_prefix,
            "harness ready"
        );
        Ok(Harness {
            config,
            zones,
            gcloud,
            remote,
            waiter,
            timings: self.timings,
            sandbox_prefix,
        })
    }
}
