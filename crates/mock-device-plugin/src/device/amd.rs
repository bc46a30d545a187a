use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::debug;

use super::node::{node_name, required_device_count};
use super::{vendor_name, DeviceError, DeviceField, DeviceInfo, Devices, ResourceSpec};

pub const AMD_DEVICE: &str = "AMDGPU";
/// Memory reported for every card, in MiB (MI300X).
pub const MI300X_MEMORY: i32 = 192000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AmdConfig {
    pub resource_count_name: String,
    pub resource_memory_name: String,
    pub memory_factor: i32,
}

#[derive(Debug)]
pub struct AmdGpuDevices {
    config: AmdConfig,
}

impl AmdGpuDevices {
    pub fn new(config: AmdConfig) -> Self {
        Self { config }
    }
}

impl Devices for AmdGpuDevices {
    fn common_word(&self) -> &str {
        AMD_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_memory_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let counts = required_device_count(node, &self.config.resource_count_name)?;
        let devices: Vec<DeviceInfo> = (0..counts)
            .map(|i| DeviceInfo {
                index: i,
                id: format!("{}-{AMD_DEVICE}-{i}", node_name(node)),
                count: 1,
                devmem: MI300X_MEMORY,
                devcore: 100,
                device_type: AMD_DEVICE.to_string(),
                health: true,
                device_vendor: AMD_DEVICE.to_string(),
                ..Default::default()
            })
            .collect();
        debug!(node = node_name(node), ?devices, "registered amd node devices");
        Ok(devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(self.config.resource_memory_name.clone(), DeviceField::Devmem)
                .with_memory_factor(self.config.memory_factor),
        ]
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::device::node::fixtures::node;

    fn devices(memory_factor: i32) -> AmdGpuDevices {
        AmdGpuDevices::new(AmdConfig {
            resource_count_name: "amd.com/gpu".to_string(),
            resource_memory_name: "amd.com/gpumem".to_string(),
            memory_factor,
        })
    }

    #[test]
    fn capacity_drives_device_list() {
        let n = node("mi300", &[], &[("amd.com/gpu", "2")]);
        let list = devices(0).get_node_devices(&n).unwrap();
        assert_eq!(
            list.iter().map(|d| d.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(list[1].id, "mi300-AMDGPU-1");
        assert_eq!(list[0].devmem, MI300X_MEMORY);
        assert_eq!(list[0].device_vendor, AMD_DEVICE);
    }

    #[test]
    fn memory_resource_with_factor() {
        let n = node("mi300", &[], &[("amd.com/gpu", "8")]);
        assert_eq!(devices(0).get_resource(&n)["gpumem"], 1_536_000);
        assert_eq!(devices(1000).get_resource(&n)["gpumem"], 1536);
        assert_eq!(devices(0).resource_namespace(), "amd.com");
    }

    #[test]
    fn implausible_capacity_is_rejected() {
        let n = node("mi300", &[], &[("amd.com/gpu", "1E")]);
        let err = devices(0).get_node_devices(&n).unwrap_err();
        assert!(matches!(err.current_context(), DeviceError::Decode { .. }));
        assert_eq!(devices(0).get_resource(&n)["gpumem"], 0);
    }

    #[test]
    fn missing_or_zero_capacity_yields_zero() {
        for capacity in [vec![], vec![("amd.com/gpu", "0")]] {
            let n = node("cpu-only", &[], &capacity);
            assert!(devices(0).get_node_devices(&n).is_err());
            assert_eq!(devices(0).get_resource(&n)["gpumem"], 0);
        }
    }
}
