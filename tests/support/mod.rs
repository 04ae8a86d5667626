//! Fake `gcloud` and `ssh` executables plus in-memory backends for driving
//! a real [`Harness`] without a cloud project.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opsprobe::Harness;
use opsprobe::LifecycleTimings;
use opsprobe::opsprobe_backend::BackendRegistry;
use opsprobe::opsprobe_backend::LogEntry;
use opsprobe::opsprobe_backend::TimeSeries;
use opsprobe::opsprobe_backend::Trace;
use opsprobe::opsprobe_backend::api::LoggingApi;
use opsprobe::opsprobe_backend::api::MetricsApi;
use opsprobe::opsprobe_backend::api::TimeSeriesQuery;
use opsprobe::opsprobe_backend::api::TraceApi;
use opsprobe::opsprobe_backend::api::TraceQuery;
use opsprobe::opsprobe_backend::types::Page;
use opsprobe::opsprobe_core::CallContext;
use opsprobe::opsprobe_core::HarnessConfig;
use opsprobe::opsprobe_core::ImageSpec;
use opsprobe::opsprobe_core::Vm;
use opsprobe::opsprobe_exec::ObjectStore;
use opsprobe::opsprobe_exec::SshKeyPair;
use parking_lot::Mutex;
use tempfile::TempDir;

pub const PROJECT: &str = "test-project";
pub const ZONE: &str = "us-central1-a";
pub const EXTERNAL_IP: &str = "203.0.113.7";
pub const INTERNAL_IP: &str = "10.0.0.5";
pub const PUBLIC_KEY: &str = "ssh-rsa AAAAB3Nza test_user";

const INSTANCE_JSON: &str = r#"[{"id": "1234", "name": "vm", "networkInterfaces": [
    {"networkIP": "10.0.0.5", "accessConfigs": [{"name": "external-nat", "natIP": "203.0.113.7"}]}
]}]"#;

const METADATA_JSON: &str = r#"{"metadata": {"items": [
    {"key": "enable-oslogin", "value": "false"},
    {"key": "serial-port-logging-enable", "value": "true"}
]}}"#;

/// `case` arms run before the defaults; `$D` is the state directory and
/// `count NAME` increments and prints a per-name counter.
const GCLOUD_TEMPLATE: &str = r#"#!/bin/sh
D='@DIR@'
echo "$*" >> "$D/gcloud.log"
count() {
  n=$(cat "$D/$1.count" 2>/dev/null || echo 0)
  n=$((n + 1))
  echo "$n" > "$D/$1.count"
  echo "$n"
}
case "$*" in
@CASES@
  *"instances create"*|*"instances list"*|*"instances start"*) cat "$D/instance.json" ;;
  *"instances describe"*) cat "$D/metadata.json" ;;
  *"disks describe"*) echo '{"name": "boot-disk"}' ;;
esac
exit 0
"#;

/// The remote command is ssh's last argument.
const SSH_TEMPLATE: &str = r#"#!/bin/sh
D='@DIR@'
for last; do :; done
printf '%s\n---\n' "$last" >> "$D/ssh.log"
count() {
  n=$(cat "$D/$1.count" 2>/dev/null || echo 0)
  n=$((n + 1))
  echo "$n" > "$D/$1.count"
  echo "$n"
}
case "$last" in
@CASES@
  *"is-system-running"*) echo running ;;
  *"os-release"*) printf debian ;;
esac
exit 0
"#;

pub struct FakeCloud {
    dir: TempDir,
    pub gcloud: PathBuf,
    pub ssh: PathBuf,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::with_cases("", "")
    }

    /// Fakes with extra `case` arms for `gcloud` and `ssh`.
    pub fn with_cases(gcloud_cases: &str, ssh_cases: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().display().to_string();
        let gcloud = write_script(dir.path(), "gcloud", GCLOUD_TEMPLATE, &state, gcloud_cases);
        let ssh = write_script(dir.path(), "ssh", SSH_TEMPLATE, &state, ssh_cases);
        std::fs::write(dir.path().join("instance.json"), INSTANCE_JSON).unwrap();
        std::fs::write(dir.path().join("metadata.json"), METADATA_JSON).unwrap();
        Self { dir, gcloud, ssh }
    }

    pub fn gcloud_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("gcloud.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    pub fn gcloud_calls_containing(&self, needle: &str) -> Vec<String> {
        self.gcloud_calls().into_iter().filter(|c| c.contains(needle)).collect()
    }

    pub fn ssh_commands(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("ssh.log"))
            .unwrap_or_default()
            .split("\n---\n")
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new(PROJECT, ZONE);
        config.gcloud_path = self.gcloud.clone();
        config.ssh_path = self.ssh.clone();
        config.log_root = Some(self.dir.path().join("logs"));
        config
    }

    pub async fn harness(&self) -> Harness {
        self.harness_with(self.config(), fast_timings()).await
    }

    pub async fn harness_with(&self, config: HarnessConfig, timings: LifecycleTimings) -> Harness {
        opsprobe::init_tracing();
        Harness::builder(config)
            .ssh_keys(SshKeyPair::from_files(self.dir.path().join("id_rsa"), PUBLIC_KEY))
            .object_store(Arc::new(NullStore::default()))
            .backends(Arc::new(empty_backends()))
            .timings(timings)
            .build(&CallContext::background())
            .await
            .unwrap()
    }
}

fn write_script(dir: &Path, name: &str, template: &str, state: &str, cases: &str) -> PathBuf {
    let path = dir.join(name);
    let script = template.replace("@DIR@", state).replace("@CASES@", cases);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Budgets short enough for tests, long enough for a shell script to run.
pub fn fast_timings() -> LifecycleTimings {
    let short = Duration::from_millis(10);
    LifecycleTimings {
        create_attempt_timeout: Duration::from_secs(10),
        create_attempts: 3,
        create_backoff: short,
        init_backoff: short,
        init_poke_timeout: Duration::from_secs(5),
        suse_readiness_max_wait: Duration::from_millis(100),
        sles_startup_delay: short,
        sles_sudo_backoff: short,
        sles_sudo_max_attempts: 3,
        sles_prepare_backoff: short,
        sles_register_max_attempts: 2,
        sles_refresh_max_attempts: 2,
        start_timeout: Duration::from_secs(10),
        start_backoff: short,
        delete_timeout: Duration::from_secs(10),
        delete_backoff: short,
        delete_max_retries: 3,
    }
}

/// A ready VM record, as if created earlier in the test.
pub fn existing_vm(image: &str) -> Vm {
    let spec: ImageSpec = image.parse().unwrap();
    let mut vm = Vm::pending(
        "test-vm".into(),
        PROJECT.into(),
        "default".into(),
        spec,
        ZONE.into(),
        "e2-standard-4".into(),
    );
    vm.id = 1234;
    vm.ip_address = EXTERNAL_IP.into();
    vm
}

/// Index of the first call containing `needle`.
pub fn position(calls: &[String], needle: &str) -> usize {
    calls
        .iter()
        .position(|c| c.contains(needle))
        .unwrap_or_else(|| panic!("no call containing {needle:?} in {calls:#?}"))
}

#[derive(Default)]
pub struct NullStore {
    pub objects: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for NullStore {
    async fn put(
        &self,
        _ctx: &CallContext,
        bucket: &str,
        object: &str,
        _content: Vec<u8>,
    ) -> opsprobe::opsprobe_exec::Result<()> {
        self.objects.lock().push(format!("{bucket}/{object}"));
        Ok(())
    }

    async fn delete(&self, _ctx: &CallContext, _bucket: &str, _object: &str) -> opsprobe::opsprobe_exec::Result<()> {
        Ok(())
    }
}

pub struct EmptyBackend;

#[async_trait]
impl MetricsApi for EmptyBackend {
    async fn list_time_series(
        &self,
        _ctx: &CallContext,
        _query: &TimeSeriesQuery,
        _page_token: Option<&str>,
    ) -> opsprobe::opsprobe_backend::Result<Page<TimeSeries>> {
        Ok(Page::last(vec![]))
    }
}

#[async_trait]
impl TraceApi for EmptyBackend {
    async fn list_traces(
        &self,
        _ctx: &CallContext,
        _query: &TraceQuery,
        _page_token: Option<&str>,
    ) -> opsprobe::opsprobe_backend::Result<Page<Trace>> {
        Ok(Page::last(vec![]))
    }
}

#[async_trait]
impl LoggingApi for EmptyBackend {
    async fn list_entries(
        &self,
        _ctx: &CallContext,
        _filter: &str,
        _page_token: Option<&str>,
    ) -> opsprobe::opsprobe_backend::Result<Page<LogEntry>> {
        Ok(Page::last(vec![]))
    }
}

pub fn empty_backends() -> BackendRegistry {
    BackendRegistry::new(Arc::new(EmptyBackend), Arc::new(EmptyBackend), |_project| {
        let client: Arc<dyn LoggingApi> = Arc::new(EmptyBackend);
        Ok(client)
    })
}
