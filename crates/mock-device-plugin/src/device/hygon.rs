use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::debug;

use super::node::node_name;
use super::{
    decode_node_devices, encode_node_devices, registered_devices, vendor_name, DeviceError,
    DeviceField, DeviceInfo, Devices, ResourceSpec,
};

pub const REGISTER_ANNOS: &str = "hami.io/node-dcu-register";
pub const HYGON_DCU_DEVICE: &str = "DCU";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HygonConfig {
    pub resource_count_name: String,
    pub resource_memory_name: String,
    pub resource_core_name: String,
    pub memory_factor: i32,
}

#[derive(Debug)]
pub struct DcuDevices {
    config: HygonConfig,
}

impl DcuDevices {
    pub fn new(config: HygonConfig) -> Self {
        Self { config }
    }
}

impl Devices for DcuDevices {
    fn common_word(&self) -> &str {
        HYGON_DCU_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_memory_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let devices = registered_devices(
            node,
            REGISTER_ANNOS,
            HYGON_DCU_DEVICE,
            decode_node_devices,
        )?;
        debug!(
            node = node_name(node),
            nodedevices = encode_node_devices(&devices),
            "nodes device information"
        );
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

    fn dcu(memory_factor: i32) -> DcuDevices {
        DcuDevices::new(HygonConfig {
            resource_count_name: "hygon.com/dcunum".to_string(),
            resource_memory_name: "hygon.com/dcumem".to_string(),
            resource_core_name: "hygon.com/dcucores".to_string(),
            memory_factor,
        })
    }

    fn six_card_node() -> Node {
        let record = "DCU-0,4,65520,100,DCU-K100_AI,0,true:";
        node("hygon-node", &[(REGISTER_ANNOS, &record.repeat(6))], &[])
    }

    #[test]
    fn get_resource_sums_six_cards() {
        let resources = dcu(0).get_resource(&six_card_node());
        assert_eq!(resources.len(), 1);
        assert_eq!(resources["dcumem"], 393120);
    }

    #[test]
    fn memory_factor_truncates() {
        assert_eq!(dcu(1000).get_resource(&six_card_node())["dcumem"], 393);
    }

    #[test]
    fn json_payload_is_rejected() {
        let n = node("hygon-node", &[(REGISTER_ANNOS, r#"[{"id":"DCU-0"}]"#)], &[]);
        assert!(dcu(0).get_node_devices(&n).is_err());
        assert_eq!(dcu(0).get_resource(&n)["dcumem"], 0);
    }

    #[test]
    fn devices_carry_vendor() {
        let devices = dcu(0).get_node_devices(&six_card_node()).unwrap();
        assert!(devices.iter().all(|d| d.device_vendor == HYGON_DCU_DEVICE));
        assert_eq!(dcu(0).resource_namespace(), "hygon.com");
    }
}
