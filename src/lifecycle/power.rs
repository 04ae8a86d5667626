//! Stopping, starting and restarting instances.

use opsprobe_core::CallContext;
use opsprobe_core::RetryPolicy;
use opsprobe_core::Vm;
use opsprobe_core::retry;
use opsprobe_core::verified::classify::classify_start_message;
use opsprobe_exec::ExecError;
use snafu::ResultExt;
use tracing::info;

use super::parse::single_instance;
use crate::error::Result;
use crate::error::StartSnafu;
use crate::harness::Harness;

impl Harness {
    pub async fn stop_instance(&self, ctx: &CallContext, vm: &Vm) -> Result<()> {
        info!(vm = %vm.name, "stopping instance");
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            "stop".to_string(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            vm.name.clone(),
        ];
        self.run_gcloud(ctx, "stop instance", &args).await?;
        Ok(())
    }

    /// Start a stopped instance and wait until it is ready again.
    ///
    /// The address may change across a stop, so `vm` gets the new one.
    pub async fn start_instance(&self, ctx: &CallContext, vm: &mut Vm) -> Result<()> {
        let ctx = ctx.with_timeout(self.timings.start_timeout);
        info!(vm = %vm.name, "starting instance");
        let args = [
            "compute".to_string(),
            "instances".to_string(),
            "start".to_string(),
            format!("--project={}", vm.project),
            format!("--zone={}", vm.zone),
            vm.name.clone(),
            "--format=json".to_string(),
        ];
        let policy = RetryPolicy::constant(self.timings.start_backoff);
        let output = retry(
            &ctx,
            &policy,
            |e: &ExecError| classify_start_message(&e.to_string()),
            |attempt_ctx, _| {
                let args = &args;
                async move { self.gcloud.run(&attempt_ctx, args).await }
            },
        )
        .await
        .context(StartSnafu { name: &vm.name })?;

        vm.ip_address = single_instance(&output.stdout)?.ip_address(self.config.use_internal_ip)?;
        info!(vm = %vm.name, ip = %vm.ip_address, "instance started");
        self.wait_for_start(&ctx, vm).await
    }

    pub async fn restart_instance(&self, ctx: &CallContext, vm: &mut Vm) -> Result<()> {
        self.stop_instance(ctx, vm).await?;
        self.start_instance(ctx, vm).await
    }
}
