use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::debug;

use super::node::{node_name, required_device_count};
use super::{vendor_name, DeviceError, DeviceField, DeviceInfo, Devices, ResourceSpec};

pub const MLU_DEVICE: &str = "MLU";
/// Physical card count published by the Cambricon node agent.
pub const REAL_MLU_COUNTS: &str = "cambricon.com/real-mlu-counts";

const MLU_MEMORY: i32 = 24576;
const MLU_SLICES: i32 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CambriconConfig {
    pub resource_count_name: String,
    pub resource_memory_name: String,
    pub resource_core_name: String,
    pub memory_factor: i32,
}

#[derive(Debug)]
pub struct CambriconDevices {
    config: CambriconConfig,
}

impl CambriconDevices {
    pub fn new(config: CambriconConfig) -> Self {
        Self { config }
    }
}

impl Devices for CambriconDevices {
    fn common_word(&self) -> &str {
        MLU_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_count_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let cards = required_device_count(node, REAL_MLU_COUNTS)?;
        let devices: Vec<DeviceInfo> = (0..cards)
            .map(|i| DeviceInfo {
                index: i,
                id: format!("{}-cambricon-mlu-{i}", node_name(node)),
                count: MLU_SLICES,
                devmem: MLU_MEMORY,
                devcore: 100,
                device_type: MLU_DEVICE.to_string(),
                health: true,
                device_vendor: MLU_DEVICE.to_string(),
                ..Default::default()
            })
            .collect();
        debug!(node = node_name(node), cards, "registered cambricon node devices");
        Ok(devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(self.config.resource_count_name.clone(), DeviceField::Count),
            ResourceSpec::new(self.config.resource_memory_name.clone(), DeviceField::Devmem)
                .with_memory_factor(self.config.memory_factor),
            ResourceSpec::new(self.config.resource_core_name.clone(), DeviceField::Devcore),
        ]
    }
}
