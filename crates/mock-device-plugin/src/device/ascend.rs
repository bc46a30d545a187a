//! Ascend NPUs, one adapter per configured chip family.

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::info;

use super::{
    registered_devices, unmarshal_node_devices, vendor_name, DeviceError, DeviceField, DeviceInfo,
    Devices, ResourceSpec,
};

/// Virtual NPU slice that the chip can be cut into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Template {
    pub name: String,
    pub memory: i64,
    #[serde(rename = "aiCore")]
    pub ai_core: i32,
    #[serde(rename = "aiCPU")]
    pub ai_cpu: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VnpuConfig {
    pub common_word: String,
    pub chip_name: String,
    pub resource_name: String,
    pub resource_memory_name: String,
    pub memory_allocatable: i64,
    pub memory_capacity: i64,
    pub memory_factor: i32,
    #[serde(rename = "aiCore")]
    pub ai_core: i32,
    #[serde(rename = "aiCPU")]
    pub ai_cpu: i32,
    pub templates: Vec<Template>,
}

#[derive(Debug)]
pub struct AscendDevices {
    config: VnpuConfig,
    node_register_anno: String,
}

impl AscendDevices {
    pub fn new(mut config: VnpuConfig) -> Self {
        config.templates.sort_by_key(|template| template.memory);
        let node_register_anno = format!("hami.io/node-register-{}", config.common_word);
        info!(
            common_word = %config.common_word,
            chip = %config.chip_name,
            templates = config.templates.len(),
            "load ascend vnpu config"
        );
        Self {
            config,
            node_register_anno,
        }
    }

    /// Builds one adapter per `vnpus` entry.
    pub fn init_devices(configs: &[VnpuConfig]) -> Vec<Self> {
        configs.iter().cloned().map(Self::new).collect()
    }

    pub fn node_register_anno(&self) -> &str {
        &self.node_register_anno
    }

    pub fn templates(&self) -> &[Template] {
        &self.config.templates
    }
}

impl Devices for AscendDevices {
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
        ]
    }
}
