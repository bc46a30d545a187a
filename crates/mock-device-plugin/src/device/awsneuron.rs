use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::debug;

use super::node::{capacity_as_i64, label, node_name, required_device_count};
use super::{vendor_name, DeviceError, DeviceField, DeviceInfo, Devices, ResourceSpec};

pub const AWS_NEURON_DEVICE: &str = "AWSNeuron";
pub const AWS_NODE_TYPE: &str = "AWSNodeType";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsNeuronConfig {
    pub resource_count_name: String,
    pub resource_core_name: String,
}

#[derive(Debug)]
pub struct AwsNeuronDevices {
    config: AwsNeuronConfig,
}

impl AwsNeuronDevices {
    pub fn new(config: AwsNeuronConfig) -> Self {
        Self { config }
    }
}

/// Bitmask with the lowest `cores` bits set.
fn core_mask(cores: i64) -> i64 {
    match cores {
        c if c <= 0 => 0,
        c if c >= 63 => i64::MAX,
        c => (1_i64 << c) - 1,
    }
}

impl Devices for AwsNeuronDevices {
    fn common_word(&self) -> &str {
        AWS_NEURON_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_core_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let counts = required_device_count(node, &self.config.resource_count_name)?;
        let cores_total = capacity_as_i64(node, &self.config.resource_core_name).unwrap_or(0);
        let cores_per_device = cores_total / i64::from(counts);
        let mask = core_mask(cores_per_device);
        let instance_type = label(node, INSTANCE_TYPE_LABEL).unwrap_or_default();

        let devices: Vec<DeviceInfo> = (0..counts)
            .map(|i| DeviceInfo {
                index: i,
                id: format!("{}-{AWS_NEURON_DEVICE}-{i}", node_name(node)),
                count: i32::try_from(cores_per_device).unwrap_or(i32::MAX),
                devcore: i32::try_from(mask).unwrap_or(i32::MAX),
                device_type: AWS_NEURON_DEVICE.to_string(),
                health: true,
                device_vendor: AWS_NEURON_DEVICE.to_string(),
                custom_info: [(AWS_NODE_TYPE.to_string(), instance_type.into())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            })
            .collect();
        debug!(
            node = node_name(node),
            counts,
            cores_per_device,
            "registered aws neuron node devices"
        );
        Ok(devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![ResourceSpec::new(
            self.config.resource_core_name.clone(),
            DeviceField::Count,
        )]
    }
}
