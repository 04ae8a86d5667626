//! Reading `gcloud ... --format=json` instance descriptions.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::HarnessError;
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Instance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkInterface {
    #[serde(default, rename = "networkIP")]
    pub network_ip: String,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AccessConfig {
    #[serde(default, rename = "natIP")]
    pub nat_ip: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetadataItem {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

fn invalid(reason: impl Into<String>) -> HarnessError {
    HarnessError::InstanceDescription { reason: reason.into() }
}

/// The only instance in a JSON list.
pub(crate) fn single_instance(stdout: &str) -> Result<Instance> {
    let mut instances: Vec<Instance> =
        serde_json::from_str(stdout).map_err(|e| invalid(format!("could not parse instance list: {e}")))?;
    if instances.len() != 1 {
        return Err(invalid(format!("expected exactly 1 instance, got {}", instances.len())));
    }
    Ok(instances.remove(0))
}

impl Instance {
    pub(crate) fn numeric_id(&self) -> Result<u64> {
        self.id.parse().map_err(|e| invalid(format!("instance id {:?} is not an integer: {e}", self.id)))
    }

    /// The address the harness reaches the instance on.
    pub(crate) fn ip_address(&self, use_internal_ip: bool) -> Result<String> {
        let interface = self.network_interfaces.first().ok_or_else(|| invalid("no network interfaces"))?;
        let ip = if use_internal_ip {
            interface.network_ip.clone()
        } else {
            let access = interface
                .access_configs
                .first()
                .ok_or_else(|| invalid("no access configs on the first network interface"))?;
            access.nat_ip.clone()
        };
        if ip.is_empty() {
            let which = if use_internal_ip { "internal" } else { "external" };
            return Err(invalid(format!("empty {which} IP address")));
        }
        Ok(ip)
    }
}

/// Instance metadata from `describe --format=json(metadata)`.
pub(crate) fn metadata_map(stdout: &str) -> Result<BTreeMap<String, String>> {
    let instance: Instance =
        serde_json::from_str(stdout).map_err(|e| invalid(format!("could not parse instance metadata: {e}")))?;
    Ok(instance.metadata.items.into_iter().map(|item| (item.key, item.value)).collect())
}
