//! Iluvatar GPUs, one adapter per configured chip family.

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::info;

use super::{
    registered_devices, unmarshal_node_devices, vendor_name, DeviceError, DeviceField, DeviceInfo,
    Devices, ResourceSpec,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IluvatarConfig {
    pub common_word: String,
    pub chip_name: String,
    pub resource_count_name: String,
    pub resource_memory_name: String,
    pub resource_core_name: String,
    pub memory_factor: i32,
}

#[derive(Debug)]
pub struct IluvatarDevices {
    config: IluvatarConfig,
    node_register_anno: String,
}

impl IluvatarDevices {
    pub fn new(config: IluvatarConfig) -> Self {
        let node_register_anno = format!("hami.io/node-register-{}", config.common_word);
        info!(
            common_word = %config.common_word,
            chip = %config.chip_name,
            "load iluvatar config"
        );
        Self {
            config,
            node_register_anno,
        }
    }

    /// Builds one adapter per `iluvatars` entry.
    pub fn init_devices(configs: &[IluvatarConfig]) -> Vec<Self> {
        configs.iter().cloned().map(Self::new).collect()
    }
}

impl Devices for IluvatarDevices {
    fn common_word(&self) -> &str {
        &self.config.common_word
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_memory_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        registered_devices(
            node,
            &self.node_register_anno,
            &self.config.common_word,
            unmarshal_node_devices,
        )
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(self.config.resource_memory_name.clone(), DeviceField::Devmem)
                .with_memory_factor(self.config.memory_factor),
            ResourceSpec::new(self.config.resource_core_name.clone(), DeviceField::Devcore),
        ]
    }
}
