use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::node::{annotation, node_name};
use super::{
    decode_node_devices_auto, decode_pair_scores, encode_node_devices, registered_devices,
    vendor_name, DeviceError, DeviceField, DeviceInfo, Devices, Geometry, ResourceSpec,
};

pub const REGISTER_ANNOS: &str = "hami.io/node-nvidia-register";
pub const REGISTER_GPU_PAIR_SCORE: &str = "hami.io/node-nvidia-score";
pub const NVIDIA_GPU_DEVICE: &str = "NVIDIA";
pub const MIG_MODE: &str = "mig";

/// Group of MIG geometries allowed on the listed GPU models.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllowedMigGeometries {
    pub models: Vec<String>,
    #[serde(rename = "allowedGeometries")]
    pub geometries: Vec<Geometry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NvidiaConfig {
    pub resource_count_name: String,
    pub resource_memory_name: String,
    pub resource_core_name: String,
    pub resource_memory_percentage_name: String,
    pub memory_factor: i32,
    #[serde(rename = "knownMigGeometries")]
    pub mig_geometries_list: Vec<AllowedMigGeometries>,
}

#[derive(Debug)]
pub struct NvidiaGpuDevices {
    config: NvidiaConfig,
}

impl NvidiaGpuDevices {
    pub fn new(config: NvidiaConfig) -> Self {
        info!(
            resource_name = %config.resource_count_name,
            resource_mem = %config.resource_memory_name,
            "initializing nvidia device"
        );
        Self { config }
    }

    /// Geometries of the first group whose model list matches `device_type`.
    fn mig_templates_for(&self, device_type: &str) -> Vec<Geometry> {
        self.config
            .mig_geometries_list
            .iter()
            .find(|group| {
                group
                    .models
                    .iter()
                    .any(|model| device_type.contains(model.as_str()))
            })
            .map(|group| group.geometries.clone())
            .unwrap_or_default()
    }

    fn attach_pair_scores(&self, node: &Node, devices: &mut [DeviceInfo]) {
        let Some(encoded) = annotation(node, REGISTER_GPU_PAIR_SCORE) else {
            debug!(node = node_name(node), "no topology score found");
            return;
        };
        let scores = match decode_pair_scores(encoded) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(
                    node = node_name(node),
                    pair_scores = encoded,
                    "failed to decode pair scores: {e:?}"
                );
                return;
            }
        };
        for device in devices.iter_mut() {
            if let Some(score) = scores.iter().find(|score| score.id == device.id) {
                device.device_pair_score = score.clone();
            }
        }
    }
}

impl Devices for NvidiaGpuDevices {
    fn common_word(&self) -> &str {
        NVIDIA_GPU_DEVICE
    }

    fn resource_namespace(&self) -> String {
        vendor_name(&self.config.resource_memory_name).to_string()
    }

    fn get_node_devices(&self, node: &Node) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
        let mut devices = registered_devices(
            node,
            REGISTER_ANNOS,
            NVIDIA_GPU_DEVICE,
            decode_node_devices_auto,
        )?;

        for device in devices.iter_mut().filter(|d| d.mode == MIG_MODE) {
            device.mig_template = self.mig_templates_for(&device.device_type);
        }
        self.attach_pair_scores(node, &mut devices);

        debug!(
            node = node_name(node),
            nodedevices = encode_node_devices(&devices),
            "nodes device information"
        );
        Ok(devices)
    }

    fn resource_specs(&self) -> Vec<ResourceSpec> {
        [
            (&self.config.resource_memory_name, DeviceField::Devmem),
            (&self.config.resource_core_name, DeviceField::Devcore),
            (
                &self.config.resource_memory_percentage_name,
                DeviceField::PerDevice(100),
            ),
        ]
        .into_iter()
        .map(|(name, field)| {
            let spec = ResourceSpec::new(name.clone(), field);
            if field == DeviceField::Devmem {
                spec.with_memory_factor(self.config.memory_factor)
            } else {
                spec
            }
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::device::node::fixtures::node;
    use crate::device::MigTemplate;

    fn config() -> NvidiaConfig {
        NvidiaConfig {
            resource_count_name: "nvidia.com/gpu".to_string(),
            resource_memory_name: "nvidia.com/gpu-memory".to_string(),
            resource_core_name: "nvidia.com/gpu-core".to_string(),
            resource_memory_percentage_name: "nvidia.com/gpu-memory-percentage".to_string(),
            ..Default::default()
        }
    }

    const A100_JSON: &str = r#"[
        {"id":"GPU-0","index":4,"count":10,"devmem":81920,"devcore":100,"type":"NVIDIA A100-SXM4-80GB","numa":1,"mode":"hami-core","health":true,"devicepairscore":{}},
        {"id":"GPU-1","index":5,"count":10,"devmem":81920,"devcore":100,"type":"NVIDIA A100-SXM4-80GB","numa":1,"mode":"hami-core","health":true,"devicepairscore":{}},
        {"id":"GPU-2","index":6,"count":10,"devmem":81920,"devcore":100,"type":"NVIDIA A100-SXM4-80GB","numa":1,"mode":"hami-core","health":true,"devicepairscore":{}}
    ]"#;

    #[test]
    fn get_resource_for_a100_node() {
        let dev = NvidiaGpuDevices::new(config());
        let n = node("test-node-nvidia-a100", &[(REGISTER_ANNOS, A100_JSON)], &[]);

        let resources = dev.get_resource(&n);

        assert_eq!(resources.len(), 3);
        assert_eq!(resources["gpu-memory"], 245760);
        assert_eq!(resources["gpu-core"], 300);
        assert_eq!(resources["gpu-memory-percentage"], 300);
        assert_eq!(dev.resource_namespace(), "nvidia.com");
    }

    #[test]
    fn get_node_devices_error_cases() {
        let dev = NvidiaGpuDevices::new(NvidiaConfig::default());
        for annotations in [
            vec![],
            vec![(REGISTER_ANNOS, "invalid-data-format")],
            vec![(REGISTER_ANNOS, "")],
            vec![(REGISTER_ANNOS, "[]")],
        ] {
            let n = node("node-bad", &annotations, &[]);
            assert!(dev.get_node_devices(&n).is_err(), "{annotations:?}");
        }
    }

    #[test]
    fn get_node_devices_old_format() {
        let dev = NvidiaGpuDevices::new(NvidiaConfig::default());
        let n = node(
            "node-example",
            &[(
                REGISTER_ANNOS,
                "GPU-f92d2cf4,10,81920,100,NVIDIA-NVIDIA A100-SXM4-80GB,1,true,6,hami-core:GPU-0d5a6e59,10,81920,100,NVIDIA-NVIDIA A100-SXM4-80GB,1,true,4,hami-core:GPU-da197561,10,81920,100,NVIDIA-NVIDIA A100-SXM4-80GB,1,true,5,hami-core:",
            )],
            &[],
        );
        let devices = dev.get_node_devices(&n).unwrap();
        assert_eq!(devices.len(), 3);
        for d in &devices {
            assert!(d.devmem != 0);
            assert!(d.devcore != 0);
            assert_eq!(d.device_vendor, NVIDIA_GPU_DEVICE);
        }
    }

    #[test]
    fn mig_devices_get_first_matching_geometry_group() {
        let small = vec![MigTemplate {
            name: "1g.10gb".to_string(),
            memory: 10240,
            count: 7,
        }];
        let large = vec![MigTemplate {
            name: "3g.40gb".to_string(),
            memory: 40960,
            count: 2,
        }];
        let mut cfg = config();
        cfg.mig_geometries_list = vec![
            AllowedMigGeometries {
                models: vec!["A30".to_string()],
                geometries: vec![large.clone()],
            },
            AllowedMigGeometries {
                models: vec!["A100-SXM4-80GB".to_string(), "H100".to_string()],
                geometries: vec![small.clone()],
            },
            AllowedMigGeometries {
                models: vec!["A100".to_string()],
                geometries: vec![large.clone()],
            },
        ];
        let dev = NvidiaGpuDevices::new(cfg);
        let n = node(
            "mig-node",
            &[(
                REGISTER_ANNOS,
                "GPU-0,7,81920,100,NVIDIA A100-SXM4-80GB,0,true,0,mig:GPU-1,10,81920,100,NVIDIA A100-SXM4-80GB,0,true,1,hami-core:",
            )],
            &[],
        );
        let devices = dev.get_node_devices(&n).unwrap();
        assert_eq!(devices[0].mig_template, vec![small]);
        assert!(devices[1].mig_template.is_empty());
    }

    #[test]
    fn pair_scores_attach_by_id_and_tolerate_garbage() {
        let dev = NvidiaGpuDevices::new(config());
        let n = node(
            "scored",
            &[
                (REGISTER_ANNOS, A100_JSON),
                (
                    REGISTER_GPU_PAIR_SCORE,
                    r#"[{"uuid":"GPU-1","score":{"GPU-0":80,"GPU-2":40}}]"#,
                ),
            ],
            &[],
        );
        let devices = dev.get_node_devices(&n).unwrap();
        assert_eq!(devices[1].device_pair_score.scores["GPU-0"], 80);
        assert!(devices[0].device_pair_score.scores.is_empty());

        let broken = node(
            "broken-scores",
            &[(REGISTER_ANNOS, A100_JSON), (REGISTER_GPU_PAIR_SCORE, "{")],
            &[],
        );
        assert_eq!(dev.get_node_devices(&broken).unwrap().len(), 3);
    }

    #[test]
    fn memory_factor_scales_only_memory() {
        let mut cfg = config();
        cfg.memory_factor = 1024;
        let dev = NvidiaGpuDevices::new(cfg);
        let n = node("factor", &[(REGISTER_ANNOS, A100_JSON)], &[]);
        let resources = dev.get_resource(&n);
        assert_eq!(resources["gpu-memory"], 240);
        assert_eq!(resources["gpu-core"], 300);
    }
}
