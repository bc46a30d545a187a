use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::debug;

use super::node::{capacity_as_i64, node_name, required_device_count};
use super::{vendor_name, DeviceError, DeviceField, DeviceInfo, Devices, ResourceSpec};

pub const ENFLAME_VGCU_DEVICE: &str = "Enflame";
pub const SHARED_RESOURCE_NAME: &str = "enflame.com/shared-gcu";
pub const COUNT_NO_SHARED_NAME: &str = "enflame.com/gcu-count";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnflameConfig {
    #[serde(rename = "resourceNameGCU")]
    pub resource_name_gcu: String,
    #[serde(rename = "resourceNameVGCU")]
    pub resource_name_vgcu: String,
    #[serde(rename = "resourceNameVGCUPercentage")]
    pub resource_name_vgcu_percentage: String,
}

#[derive(Debug)]
pub struct EnflameDevices {
    config: EnflameConfig,
}

impl EnflameDevices {
    pub fn new(config: EnflameConfig) -> Self {
        Self { config }
    }
}

impl Devices for EnflameDevices {
    fn common_word(&self) -> &str {
        ENFLAME_VGCU_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_name_vgcu).to_string()
    }

    /// Spreads the shared slices over the cards, the first cards taking
    /// the remainder, so the counts add up to the shared capacity.
    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let cards = required_device_count(node, COUNT_NO_SHARED_NAME)?;
        let shared = capacity_as_i64(node, SHARED_RESOURCE_NAME).unwrap_or(0);
        let slices_per_card = shared / i64::from(cards);
        if slices_per_card <= 0 {
            return Err(Report::new(DeviceError::NotFound {
                key: SHARED_RESOURCE_NAME.to_string(),
            })
            .attach_printable(format!("{shared} shared slices for {cards} cards")));
        }
        let remainder = shared % i64::from(cards);

        let devices = (0..cards)
            .map(|i| {
                let slices = slices_per_card + i64::from(i64::from(i) < remainder);
                let count = i32::try_from(slices).map_err(|_| {
                    Report::new(DeviceError::Decode {
                        message: format!("{SHARED_RESOURCE_NAME} out of range: {shared}"),
                    })
                })?;
                Ok(DeviceInfo {
                    index: i,
                    id: format!("{}-enflame-{i}", node_name(node)),
                    count,
                    devmem: 100,
                    devcore: 100,
                    device_type: ENFLAME_VGCU_DEVICE.to_string(),
                    health: true,
                    device_vendor: ENFLAME_VGCU_DEVICE.to_string(),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, Report<DeviceError>>>()?;
        debug!(
            node = node_name(node),
            cards,
            shared,
            "registered enflame node devices"
        );
        Ok(devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new(self.config.resource_name_vgcu.clone(), DeviceField::Count),
            ResourceSpec::new(
                self.config.resource_name_vgcu_percentage.clone(),
                DeviceField::Devcore,
            ),
        ]
    }
}
