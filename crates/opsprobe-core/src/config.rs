//! Harness configuration read from the environment.
//!
//! Test runners pass everything through environment variables. The harness
//! reads them once, validates them, and fails fast on anything malformed.

use std::path::PathBuf;

use snafu::Snafu;

use crate::constants::DEFAULT_NETWORK;
use crate::constants::DEFAULT_TRANSFERS_BUCKET;
use crate::verified::parse_zone_weights;

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid
    #[snafu(display("Invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue { key: String, value: String, reason: String },

    /// A required configuration value is missing
    #[snafu(display("Missing required configuration: {key} ({hint})"))]
    MissingRequired { key: String, hint: String },
}

/// Everything the harness needs to know about its environment.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Cloud project VMs are created in (`PROJECT`).
    pub project: String,
    /// Weighted zone list, `zone=weight,...` (`ZONES`).
    pub zones: String,
    /// VPC network (`NETWORK_NAME`).
    pub network: String,
    /// Reach VMs through their internal IP and create them without an
    /// external one (`USE_INTERNAL_IP`).
    pub use_internal_ip: bool,
    /// Service account attached to VMs (`SERVICE_EMAIL`).
    pub service_account: Option<String>,
    /// Bucket used to move files onto VMs (`TRANSFERS_BUCKET`).
    pub transfers_bucket: String,
    /// Overrides every machine type (`INSTANCE_SIZE`).
    pub instance_size: Option<String>,
    /// Root directory for per-test logs (`TEST_UNDECLARED_OUTPUTS_DIR`).
    pub log_root: Option<PathBuf>,
    /// Provisioning CLI (`GCLOUD_BIN`).
    pub gcloud_path: PathBuf,
    /// Remote shell client (`SSH_BIN`).
    pub ssh_path: PathBuf,
    /// Key generator (`SSH_KEYGEN_BIN`).
    pub ssh_keygen_path: PathBuf,
    /// Prepended to every sandbox prefix (`VM_NAME_PREFIX`).
    pub vm_name_prefix: Option<String>,
    /// Attached to VMs as the `build_id` label (`BUILD_ID`).
    pub build_id: Option<String>,
    /// Where logs land in the uploaded build artifacts (`BUILD_ARTIFACTS_SUBDIR`).
    pub artifacts_subdir: Option<String>,
    /// Browser-facing root for uploaded logs (`LOG_UPLOAD_URL_ROOT`).
    pub log_upload_url_root: Option<String>,
    /// Image specs a test matrix runs against (`IMAGE_SPECS`).
    pub image_specs: Vec<String>,
}

impl HarnessConfig {
    /// Config with required values and defaults for everything else.
    pub fn new(project: impl Into<String>, zones: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zones: zones.into(),
            network: DEFAULT_NETWORK.to_string(),
            use_internal_ip: false,
            service_account: None,
            transfers_bucket: DEFAULT_TRANSFERS_BUCKET.to_string(),
            instance_size: None,
            log_root: None,
            gcloud_path: PathBuf::from("gcloud"),
            ssh_path: PathBuf::from("ssh"),
            ssh_keygen_path: PathBuf::from("ssh-keygen"),
            vm_name_prefix: None,
            build_id: None,
            artifacts_subdir: None,
            log_upload_url_root: None,
            image_specs: Vec::new(),
        }
    }

    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let project = get("PROJECT").ok_or_else(|| ConfigError::MissingRequired {
            key: "PROJECT".into(),
            hint: "cloud project to create test VMs in".into(),
        })?;
        let zones = get("ZONES").ok_or_else(|| ConfigError::MissingRequired {
            key: "ZONES".into(),
            hint: "comma-separated zone=weight list, e.g. us-central1-a=2,us-east1-b".into(),
        })?;

        let mut config = Self::new(project, zones);
        if let Some(network) = get("NETWORK_NAME") {
            config.network = network;
        }
        if let Some(value) = get("USE_INTERNAL_IP") {
            config.use_internal_ip = parse_bool("USE_INTERNAL_IP", &value)?;
        }
        config.service_account = get("SERVICE_EMAIL");
        if let Some(bucket) = get("TRANSFERS_BUCKET") {
            config.transfers_bucket = bucket;
        }
        config.instance_size = get("INSTANCE_SIZE");
        config.log_root = get("TEST_UNDECLARED_OUTPUTS_DIR").map(PathBuf::from);
        if let Some(path) = get("GCLOUD_BIN") {
            config.gcloud_path = PathBuf::from(path);
        }
        if let Some(path) = get("SSH_BIN") {
            config.ssh_path = PathBuf::from(path);
        }
        if let Some(path) = get("SSH_KEYGEN_BIN") {
            config.ssh_keygen_path = PathBuf::from(path);
        }
        config.vm_name_prefix = get("VM_NAME_PREFIX");
        config.build_id = get("BUILD_ID");
        config.artifacts_subdir = get("BUILD_ARTIFACTS_SUBDIR");
        config.log_upload_url_root = get("LOG_UPLOAD_URL_ROOT");
        config.image_specs = get("IMAGE_SPECS")
            .map(|specs| specs.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-test.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return MissingRequiredSnafu {
                key: "PROJECT",
                hint: "cloud project to create test VMs in",
            }
            .fail();
        }
        if let Err(e) = parse_zone_weights(&self.zones) {
            return InvalidValueSnafu {
                key: "ZONES",
                value: self.zones.clone(),
                reason: e.to_string(),
            }
            .fail();
        }
        if self.transfers_bucket.contains('/') {
            return InvalidValueSnafu {
                key: "TRANSFERS_BUCKET",
                value: self.transfers_bucket.clone(),
                reason: "bucket names cannot contain '/'",
            }
            .fail();
        }
        for spec in &self.image_specs {
            if let Err(e) = spec.parse::<crate::image::ImageSpec>() {
                return InvalidValueSnafu {
                    key: "IMAGE_SPECS",
                    value: spec.clone(),
                    reason: e.to_string(),
                }
                .fail();
            }
        }
        Ok(())
    }

    /// Label attached to every VM when a build ID is known.
    pub fn build_label(&self) -> Option<(String, String)> {
        self.build_id.as_ref().map(|id| ("build_id".to_string(), id.clone()))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => InvalidValueSnafu {
            key,
            value,
            reason: "expected true or false",
        }
        .fail(),
    }
}
