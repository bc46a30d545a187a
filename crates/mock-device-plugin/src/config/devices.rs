use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tracing::{info, warn};

use super::ConfigError;
use crate::device::amd::{AmdConfig, AmdGpuDevices};
use crate::device::ascend::{AscendDevices, VnpuConfig};
use crate::device::awsneuron::{AwsNeuronConfig, AwsNeuronDevices};
use crate::device::cambricon::{CambriconConfig, CambriconDevices};
use crate::device::enflame::{EnflameConfig, EnflameDevices};
use crate::device::hygon::{DcuDevices, HygonConfig};
use crate::device::iluvatar::{IluvatarConfig, IluvatarDevices};
use crate::device::kunlun::{KunlunConfig, KunlunVDevices};
use crate::device::nvidia::{NvidiaConfig, NvidiaGpuDevices};
use crate::device::Devices;

/// Vendor sections of the device config file.
///
/// A vendor is enabled when its section is present. Keys that are not listed
/// here are ignored, so the scheduler's device config can be mounted as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub nvidia: Option<NvidiaConfig>,
    pub amd: Option<AmdConfig>,
    pub vnpus: Option<Vec<VnpuConfig>>,
    pub cambricon: Option<CambriconConfig>,
    pub hygon: Option<HygonConfig>,
    pub kunlun: Option<KunlunConfig>,
    pub awsneuron: Option<AwsNeuronConfig>,
    pub enflame: Option<EnflameConfig>,
    pub iluvatars: Option<Vec<IluvatarConfig>>,
}

/// Reads and parses the device config file.
///
/// # Errors
///
/// - [`ConfigError::Read`] if the file cannot be read
/// - [`ConfigError::Parse`] if the content is not a valid device config
pub async fn load_config(path: &Path) -> Result<DeviceConfig, Report<ConfigError>> {
    info!("Loading device configuration from {:?}", path);
    let content = tokio::fs::read_to_string(path)
        .await
        .change_context(ConfigError::Read {
            path: path.display().to_string(),
        })?;
    parse_config(&content).change_context(ConfigError::Parse {
        path: path.display().to_string(),
    })
}

fn parse_config(content: &str) -> Result<DeviceConfig, serde_yaml::Error> {
    // An empty document deserializes to `None`.
    Ok(serde_yaml::from_str::<Option<DeviceConfig>>(content)?.unwrap_or_default())
}

/// Builds the enabled vendor adapters, keyed by common word.
pub fn init_devices(config: &DeviceConfig) -> BTreeMap<String, Arc<dyn Devices>> {
    let mut adapters: Vec<Arc<dyn Devices>> = Vec::new();
    if let Some(nvidia) = &config.nvidia {
        adapters.push(Arc::new(NvidiaGpuDevices::new(nvidia.clone())));
    }
    if let Some(amd) = &config.amd {
        adapters.push(Arc::new(AmdGpuDevices::new(amd.clone())));
    }
    if let Some(vnpus) = &config.vnpus {
        for dev in AscendDevices::init_devices(vnpus) {
            adapters.push(Arc::new(dev));
        }
    }
    if let Some(cambricon) = &config.cambricon {
        adapters.push(Arc::new(CambriconDevices::new(cambricon.clone())));
    }
    if let Some(hygon) = &config.hygon {
        adapters.push(Arc::new(DcuDevices::new(hygon.clone())));
    }
    if let Some(kunlun) = &config.kunlun {
        adapters.push(Arc::new(KunlunVDevices::new(kunlun.clone())));
    }
    if let Some(awsneuron) = &config.awsneuron {
        adapters.push(Arc::new(AwsNeuronDevices::new(awsneuron.clone())));
    }
    if let Some(enflame) = &config.enflame {
        adapters.push(Arc::new(EnflameDevices::new(enflame.clone())));
    }
    if let Some(iluvatars) = &config.iluvatars {
        for dev in IluvatarDevices::init_devices(iluvatars) {
            adapters.push(Arc::new(dev));
        }
    }

    let mut devices = BTreeMap::new();
    for adapter in adapters {
        let common_word = adapter.common_word().to_string();
        if devices.insert(common_word.clone(), adapter).is_some() {
            warn!(common_word, "duplicate device config entry, keeping the last one");
        }
    }
    info!(vendors = ?devices.keys().collect::<Vec<_>>(), "initialized devices");
    devices
}
