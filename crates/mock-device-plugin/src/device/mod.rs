//! Device model and vendor adapters.
//!
//! Every accelerator family implements [`Devices`]: it reads node level
//! signals (capacity entries or register annotations), turns them into a list
//! of [`DeviceInfo`] and aggregates the list into a [`ResourceQuantityMap`]
//! that is handed to the vendor's [`crate::mock::MockLister`].

use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub mod amd;
pub mod ascend;
pub mod awsneuron;
pub mod cambricon;
pub mod codec;
pub mod enflame;
pub mod hygon;
pub mod iluvatar;
pub mod kunlun;
pub mod node;
pub mod nvidia;

pub use codec::{
    decode_node_devices, decode_node_devices_auto, decode_pair_scores, encode_node_devices,
    resource_name, unmarshal_node_devices, vendor_name,
};

/// Sharing mode assumed when a register annotation does not carry one.
pub const DEFAULT_MODE: &str = "hami-core";

/// Resource name to quantity, keyed by the bare resource name (no vendor prefix).
pub type ResourceQuantityMap = BTreeMap<String, i64>;

/// One accelerator unit discovered on a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub id: String,
    pub index: u32,
    /// Allocation unit multiplier, e.g. 10 slices per card.
    pub count: i32,
    pub devmem: i32,
    pub devcore: i32,
    #[serde(rename = "type")]
    pub device_type: String,
    pub numa: i32,
    pub mode: String,
    #[serde(rename = "migtemplate", skip_serializing_if = "Vec::is_empty")]
    pub mig_template: Vec<Geometry>,
    pub health: bool,
    #[serde(rename = "devicevendor")]
    pub device_vendor: String,
    #[serde(rename = "custominfo", skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_info: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "devicepairscore")]
    pub device_pair_score: DevicePairScore,
}

/// One partition slice of a MIG style geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigTemplate {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Memory")]
    pub memory: i32,
    #[serde(alias = "Count")]
    pub count: i32,
}

/// Ordered set of slices that one physical device can be cut into.
pub type Geometry = Vec<MigTemplate>;

/// Topology affinity of one device towards its peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePairScore {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "score")]
    pub scores: BTreeMap<String, i32>,
}

pub type DevicePairScores = Vec<DevicePairScore>;

/// Errors raised while reading devices from a node.
#[derive(Debug, derive_more::Display)]
pub enum DeviceError {
    #[display("Device source not found: {key}")]
    NotFound { key: String },
    #[display("Failed to decode node devices: {message}")]
    Decode { message: String },
}

impl Error for DeviceError {}

/// Per device field that a resource quantity is summed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceField {
    Count,
    Devmem,
    Devcore,
    /// Same contribution for every device, e.g. 100 for percentage resources.
    PerDevice(i64),
}

impl DeviceField {
    fn value_of(self, device: &DeviceInfo) -> i64 {
        match self {
            DeviceField::Count => i64::from(device.count),
            DeviceField::Devmem => i64::from(device.devmem),
            DeviceField::Devcore => i64::from(device.devcore),
            DeviceField::PerDevice(value) => value,
        }
    }
}

/// Describes how one advertised resource is derived from the device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Fully qualified resource name, e.g. `nvidia.com/gpumem`.
    pub name: String,
    pub field: DeviceField,
    /// Down-scaling divisor, applied only when greater than 1.
    pub memory_factor: i32,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, field: DeviceField) -> Self {
        Self {
            name: name.into(),
            field,
            memory_factor: 0,
        }
    }

    pub fn with_memory_factor(mut self, memory_factor: i32) -> Self {
        self.memory_factor = memory_factor;
        self
    }
}

/// Contract shared by every vendor adapter.
pub trait Devices: Send + Sync {
    /// Stable vendor display tag, used as the registry key.
    fn common_word(&self) -> &str;

    /// Vendor prefix of the advertised resources, e.g. `nvidia.com`.
    fn resource_namespace(&self) -> String;

    /// Builds the device list of `node`.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NotFound`] if the capacity entry or annotation is absent
    /// - [`DeviceError::Decode`] if the annotation cannot be decoded or holds no devices
    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>>;

    /// Resources advertised by this vendor and how they are computed.
    ///
    /// Specs with an empty name stand for unconfigured resources.
    fn resource_specs(&self) -> Vec<ResourceSpec>;

    /// Aggregates the node's devices into resource quantities.
    ///
    /// Resources whose name is not configured are left out. Never fails: any
    /// adapter error degrades every resource to zero.
    fn get_resource(&self, node: &Node) -> ResourceQuantityMap {
        let specs: Vec<ResourceSpec> = self
            .resource_specs()
            .into_iter()
            .filter(|spec| !spec.name.is_empty())
            .collect();
        let mut resources: ResourceQuantityMap = specs
            .iter()
            .map(|spec| (resource_name(&spec.name).to_string(), 0))
            .collect();

        let devices = match self.get_node_devices(node) {
            Ok(devices) if !devices.is_empty() => devices,
            Ok(_) => {
                info!(vendor = self.common_word(), "no device on this node");
                return resources;
            }
            Err(e) => {
                info!(vendor = self.common_word(), "no device on this node: {e:?}");
                return resources;
            }
        };

        for spec in &specs {
            let raw: i64 = devices.iter().map(|d| spec.field.value_of(d)).sum();
            let quantity = if spec.memory_factor > 1 {
                let scaled = raw / i64::from(spec.memory_factor);
                info!(
                    resource = %spec.name,
                    raw,
                    after = scaled,
                    factor = spec.memory_factor,
                    "update memory"
                );
                scaled
            } else {
                raw
            };
            resources.insert(resource_name(&spec.name).to_string(), quantity);
        }
        info!(vendor = self.common_word(), ?resources, "add resources");
        resources
    }
}

/// Stamps the vendor tag on every device of `devices`.
pub(crate) fn stamp_vendor(devices: &mut [DeviceInfo], vendor: &str) {
    for device in devices.iter_mut() {
        device.device_vendor = vendor.to_string();
    }
}

type Decoder = fn(&str) -> Result<Vec<DeviceInfo>, Report<DeviceError>>;

/// Reads the devices a node agent published under the register annotation `key`.
///
/// An empty device list is reported as [`DeviceError::Decode`].
pub(crate) fn registered_devices(
    node: &Node,
    key: &str,
    vendor: &str,
    decode: Decoder,
) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
    let encoded = node::required_annotation(node, key)?;
    let mut devices = decode(encoded).inspect_err(|e| {
        error!(
            node = node::node_name(node),
            device_annotation = encoded,
            "failed to decode node devices: {e:?}"
        );
    })?;
    if devices.is_empty() {
        info!(
            node = node::node_name(node),
            device_annotation = encoded,
            "no {vendor} device found"
        );
        return Err(Report::new(DeviceError::Decode {
            message: "no device found on node".to_string(),
        }));
    }
    stamp_vendor(&mut devices, vendor);
    Ok(devices)
}
