//! VM records and creation options.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use snafu::Snafu;
use uuid::Uuid;

use crate::image::ImageSpec;
use crate::image::Platform;

/// Operating system reported by the guest.
///
/// Linux guests report the `ID` field of `/etc/os-release`; Windows guests
/// are always `windows`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Os {
    pub id: String,
}

impl Os {
    pub fn windows() -> Self {
        Self { id: "windows".into() }
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// SUSE Linux Enterprise Server, including the SAP flavour.
    pub fn is_sles(&self) -> bool {
        matches!(self.id.as_str(), "sles" | "sles_sap")
    }

    /// Any SUSE distribution, including openSUSE.
    pub fn is_suse(&self) -> bool {
        self.is_sles() || matches!(self.id.as_str(), "opensuse" | "opensuse-leap")
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A provisioned virtual machine.
///
/// Only the lifecycle manager creates and mutates these.
#[derive(Debug, Clone)]
pub struct Vm {
    pub name: String,
    pub project: String,
    pub network: String,
    pub image_spec: ImageSpec,
    pub platform: Platform,
    /// Filled in after the guest answers over ssh.
    pub os: Os,
    pub zone: String,
    pub machine_type: String,
    pub id: u64,
    /// Internal or external address, depending on configuration.
    pub ip_address: String,
    /// Set once deletion has succeeded; later deletes are no-ops.
    pub already_deleted: bool,
}

impl Vm {
    /// A VM record that has not been matched to a cloud instance yet.
    pub fn pending(
        name: String,
        project: String,
        network: String,
        image_spec: ImageSpec,
        zone: String,
        machine_type: String,
    ) -> Self {
        let platform = image_spec.platform();
        Self {
            name,
            project,
            network,
            image_spec,
            platform,
            os: Os::default(),
            zone,
            machine_type,
            id: 0,
            ip_address: String::new(),
            already_deleted: false,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.platform.is_windows()
    }
}

/// A VM owned by a single-instance managed instance group.
#[derive(Debug, Clone)]
pub struct ManagedInstanceGroupVm {
    pub vm: Vm,
}

impl ManagedInstanceGroupVm {
    pub fn new(vm: Vm) -> Self {
        Self { vm }
    }

    pub fn group_name(&self) -> String {
        format!("{}-mig", self.vm.name)
    }

    pub fn template_name(&self) -> String {
        format!("{}-tmpl", self.vm.name)
    }

    pub fn workload_name(&self) -> String {
        format!("{}-wl", self.vm.name)
    }
}

impl std::ops::Deref for ManagedInstanceGroupVm {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        &self.vm
    }
}

impl std::ops::DerefMut for ManagedInstanceGroupVm {
    fn deref_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum VmOptionsError {
    #[snafu(display("VM options must specify an image spec"))]
    MissingImageSpec,

    #[snafu(display("{source}"))]
    BadImageSpec { source: crate::image::InvalidImageSpec },

    #[snafu(display("metadata key {key:?} is reserved and set by the harness"))]
    ReservedMetadataKey { key: String },
}

/// What a test asks for when creating a VM. Empty fields get defaults.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Required. `<project>:<family>` or `<project>=<image>`.
    pub image_spec: String,
    /// Passed to `--max-run-duration`; the VM deletes itself afterwards.
    pub time_to_live: Option<String>,
    pub name: Option<String>,
    pub project: Option<String>,
    pub zone: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub machine_type: Option<String>,
    /// `--image-family-scope`, `global` when unset.
    pub image_family_scope: Option<String>,
    pub extra_create_arguments: Vec<String>,
}

impl VmOptions {
    pub fn new(image_spec: impl Into<String>) -> Self {
        Self {
            image_spec: image_spec.into(),
            ..Self::default()
        }
    }

    /// Check the options and parse the image spec.
    pub fn validate(&self) -> Result<ImageSpec, VmOptionsError> {
        if self.image_spec.trim().is_empty() {
            return MissingImageSpecSnafu.fail();
        }
        self.image_spec.parse().map_err(|source| VmOptionsError::BadImageSpec { source })
    }
}

/// Per-run name prefix shared by every VM a test binary creates:
/// `test-YYYYMMDD-xxxxx`, optionally behind a caller-provided prefix.
pub fn sandbox_prefix(now: DateTime<Utc>, extra_prefix: Option<&str>) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
    let base = format!("test-{}-{suffix}", now.format("%Y%m%d"));
    match extra_prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}-{base}"),
        _ => base,
    }
}

/// A fresh instance name under `prefix`.
///
/// Managed instance groups derive longer names from the instance name, so
/// their instances use a shorter random part.
pub fn instance_name(prefix: &str, for_mig: bool) -> String {
    let id = Uuid::new_v4().to_string();
    if for_mig {
        format!("{prefix}-{}", &id[..30])
    } else {
        format!("{prefix}-{id}")
    }
}
