//! Metadata, labels and `gcloud` flags attached to every new VM.

use std::collections::BTreeMap;

use opsprobe_core::HarnessConfig;
use opsprobe_core::ImageSpec;
use opsprobe_core::VmOptions;
use opsprobe_core::constants::SSH_USER_NAME;
use opsprobe_core::vm::VmOptionsError;

// ============================================================================
// Metadata keys
// ============================================================================

const SERIAL_PORT_LOGGING: &str = "serial-port-logging-enable";
const ENABLE_OSLOGIN: &str = "enable-oslogin";
const SSH_KEYS: &str = "ssh-keys";
const WINDOWS_SPECIALIZE_SCRIPT: &str = "sysprep-specialize-script-cmd";
const ENABLE_WINDOWS_SSH: &str = "enable-windows-ssh";
const STARTUP_SCRIPT: &str = "startup-script";

/// Installs the ssh server while Windows specializes.
const WINDOWS_SSH_INSTALL: &str = "googet -noconfirm=true install google-compute-engine-ssh";

/// Merge caller metadata with the keys the harness owns.
///
/// Callers may override `serial-port-logging-enable`; the keys the harness
/// sets itself are rejected.
pub fn framework_metadata(
    image: &ImageSpec,
    requested: &BTreeMap<String, String>,
    ssh_entry: &str,
) -> Result<BTreeMap<String, String>, VmOptionsError> {
    let mut reserved = vec![ENABLE_OSLOGIN, SSH_KEYS];
    if image.is_windows() {
        reserved.extend([WINDOWS_SPECIALIZE_SCRIPT, ENABLE_WINDOWS_SSH]);
    } else {
        reserved.push(STARTUP_SCRIPT);
    }
    if let Some(key) = requested.keys().find(|key| reserved.contains(&key.as_str())) {
        return Err(VmOptionsError::ReservedMetadataKey { key: key.clone() });
    }

    let mut metadata = BTreeMap::from([(SERIAL_PORT_LOGGING.to_string(), "true".to_string())]);
    metadata.extend(requested.iter().map(|(k, v)| (k.clone(), v.clone())));
    metadata.insert(ENABLE_OSLOGIN.to_string(), "false".to_string());
    metadata.insert(SSH_KEYS.to_string(), ssh_entry.to_string());

    if image.is_windows() {
        metadata.insert(WINDOWS_SPECIALIZE_SCRIPT.to_string(), WINDOWS_SSH_INSTALL.to_string());
        metadata.insert(ENABLE_WINDOWS_SSH.to_string(), "TRUE".to_string());
    } else if image.needs_ssh_key_repair() {
        metadata.insert(STARTUP_SCRIPT.to_string(), ssh_key_repair_script());
    }
    Ok(metadata)
}

/// This image's guest setup rewrites `/etc/passwd` and the test user's home
/// a couple of minutes after boot, leaving `authorized_keys` unusable.
fn ssh_key_repair_script() -> String {
    format!(
        r#"#!/bin/bash
sleep 120
HOMEDIR=/home/{user}
SSHFILE=$HOMEDIR/.ssh/authorized_keys
if [ ! -f "$SSHFILE" ]; then
  sudo mkdir -p "$HOMEDIR/.ssh"
  sudo touch "$SSHFILE"
fi
sudo chown -R {user}:{user} "$HOMEDIR"
sudo chmod 600 "$SSHFILE"
"#,
        user = SSH_USER_NAME
    )
}

/// Caller labels plus `build_id` when the run has one.
pub fn framework_labels(config: &HarnessConfig, requested: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = requested.clone();
    if let Some((key, value)) = config.build_label() {
        labels.insert(key, value);
    }
    labels
}

/// `--<flag>=k=v,...`, switching to gcloud's alternate-delimiter syntax when
/// a value contains a comma.
pub(crate) fn key_value_flag(flag: &str, pairs: &BTreeMap<String, String>) -> String {
    let needs_alternate = pairs.values().any(|v| v.contains(','));
    let separator = if needs_alternate { ";" } else { "," };
    let body = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(separator);
    if needs_alternate {
        format!("--{flag}=^;^{body}")
    } else {
        format!("--{flag}={body}")
    }
}

/// Everything after the fixed create arguments: image selection, metadata,
/// labels, networking, time-to-live and caller extras.
///
/// Shared by instance creation and instance template creation.
pub(crate) fn provisioning_flags(
    config: &HarnessConfig,
    options: &VmOptions,
    image: &ImageSpec,
    metadata: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut flags = image.create_flags();
    if !metadata.is_empty() {
        flags.push(key_value_flag("metadata", metadata));
    }
    if !labels.is_empty() {
        flags.push(key_value_flag("labels", labels));
    }
    if let Some(account) = &config.service_account {
        flags.push(format!("--service-account={account}"));
    }
    if config.use_internal_ip {
        flags.push("--no-address".to_string());
    }
    if let Some(ttl) = &options.time_to_live {
        flags.push(format!("--max-run-duration={ttl}"));
        flags.push("--instance-termination-action=DELETE".to_string());
        flags.push("--provisioning-model=STANDARD".to_string());
    }
    flags.extend(options.extra_create_arguments.iter().cloned());
    flags
}
