use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;

use super::{
    registered_devices, unmarshal_node_devices, vendor_name, DeviceError, DeviceField, DeviceInfo,
    Devices, ResourceSpec,
};

pub const REGISTER_ANNOS: &str = "hami.io/node-register-xpu";
pub const XPU_DEVICE: &str = "XPU";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KunlunConfig {
    pub resource_count_name: String,
    #[serde(rename = "resourceVCountName")]
    pub resource_vcount_name: String,
    #[serde(rename = "resourceVMemoryName")]
    pub resource_vmemory_name: String,
}

/// Kunlun XPUs shared as virtual devices.
#[derive(Debug)]
pub struct KunlunVDevices {
    config: KunlunConfig,
}

impl KunlunVDevices {
    pub fn new(config: KunlunConfig) -> Self {
        Self { config }
    }
}

impl Devices for KunlunVDevices {
    fn common_word(&self) -> &str {
        XPU_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_vcount_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        registered_devices(node, REGISTER_ANNOS, XPU_DEVICE, unmarshal_node_devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(self.config.resource_vcount_name.clone(), DeviceField::Devcore),
            ResourceSpec::new(self.config.resource_vmemory_name.clone(), DeviceField::Devmem),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::device::node::fixtures::node;

    fn xpu() -> KunlunVDevices {
        KunlunVDevices::new(KunlunConfig {
            resource_count_name: "kunlunxin.com/xpu".to_string(),
            resource_vcount_name: "kunlunxin.com/vxpu".to_string(),
            resource_vmemory_name: "kunlunxin.com/vxpu-memory".to_string(),
        })
    }

    #[test]
    fn vcount_sums_devcore_and_vmemory_sums_devmem() {
        let n = node(
            "xpu-node",
            &[(
                REGISTER_ANNOS,
                r#"[{"id":"XPU-0","devmem":98304,"devcore":4},{"id":"XPU-1","devmem":98304,"devcore":4}]"#,
            )],
            &[],
        );
        assert_eq!(
            xpu().get_resource(&n),
            BTreeMap::from([("vxpu".to_string(), 8), ("vxpu-memory".to_string(), 196608)])
        );
        assert_eq!(xpu().resource_namespace(), "kunlunxin.com");
    }

    #[test]
    fn missing_annotation_degrades_to_zero() {
        let n = node("cpu-node", &[], &[]);
        assert_eq!(
            xpu().get_resource(&n),
            BTreeMap::from([("vxpu".to_string(), 0), ("vxpu-memory".to_string(), 0)])
        );
    }
}
