//! Encoding of node register annotations.
//!
//! Two payload formats are in use:
//! - a compact record format, `id,count,devmem,devcore,type,numa,health[,index,mode]`
//!   with every record terminated by `:`
//! - a JSON array of [`DeviceInfo`] objects

use std::num::IntErrorKind;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;

use super::{DeviceError, DeviceInfo, DevicePairScores, DEFAULT_MODE};

/// Separates the device records of one register annotation.
pub const ONE_CONTAINER_MULTI_DEVICE_SPLIT_SYMBOL: char = ':';

/// Separates the fields of one device record.
const FIELD_SPLIT_SYMBOL: char = ',';

const DECODE_FAILED: &str = "node annotations not decode successfully";

fn decode_error() -> Report<DeviceError> {
    Report::new(DeviceError::Decode {
        message: DECODE_FAILED.to_string(),
    })
}

/// Lenient boolean parsing, accepting the usual spellings of true and false.
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

/// Malformed numbers read as 0; well-formed numbers outside 32 bits are rejected.
fn parse_i32(field: &str, value: &str) -> Result<i32, Report<DeviceError>> {
    match value.parse::<i32>() {
        Ok(parsed) => Ok(parsed),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Err(decode_error().attach_printable(format!("{field} out of range: {value}")))
        }
        Err(_) => Ok(0),
    }
}

/// Decodes the compact record format.
///
/// # Errors
///
/// - [`DeviceError::Decode`] if the payload has no record separator, a record
///   has neither 7 nor 9 fields, or a numeric field overflows 32 bits
pub fn decode_node_devices(encoded: &str) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
    if !encoded.contains(ONE_CONTAINER_MULTI_DEVICE_SPLIT_SYMBOL) {
        return Err(decode_error().attach_printable(encoded.to_string()));
    }

    let mut devices = Vec::new();
    for record in encoded.split(ONE_CONTAINER_MULTI_DEVICE_SPLIT_SYMBOL) {
        if !record.contains(FIELD_SPLIT_SYMBOL) {
            continue;
        }
        let items: Vec<&str> = record.split(FIELD_SPLIT_SYMBOL).collect();
        if items.len() != 7 && items.len() != 9 {
            return Err(decode_error().attach_printable(format!(
                "expected 7 or 9 fields, got {} in {record}",
                items.len()
            )));
        }

        let (index, mode) = if items.len() == 9 {
            (items[7].parse::<u32>().unwrap_or(0), items[8].to_string())
        } else {
            (0, DEFAULT_MODE.to_string())
        };

        devices.push(DeviceInfo {
            id: items[0].to_string(),
            count: parse_i32("count", items[1])?,
            devmem: parse_i32("devmem", items[2])?,
            devcore: parse_i32("devcore", items[3])?,
            device_type: items[4].to_string(),
            numa: items[5].parse::<i32>().unwrap_or(0),
            health: parse_bool(items[6]),
            index,
            mode,
            ..Default::default()
        });
    }
    Ok(devices)
}

/// Encodes devices in the 9 field record format.
pub fn encode_node_devices(devices: &[DeviceInfo]) -> String {
    let mut encoded = String::new();
    for device in devices {
        encoded.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}{}",
            device.id,
            device.count,
            device.devmem,
            device.devcore,
            device.device_type,
            device.numa,
            device.health,
            device.index,
            device.mode,
            ONE_CONTAINER_MULTI_DEVICE_SPLIT_SYMBOL
        ));
    }
    debug!("encoded node devices: {encoded}");
    encoded
}

/// Decodes a JSON array of devices.
///
/// # Errors
///
/// - [`DeviceError::Decode`] if the payload is not a JSON device array
pub fn unmarshal_node_devices(encoded: &str) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
    serde_json::from_str::<Option<Vec<DeviceInfo>>>(encoded)
        .map(Option::unwrap_or_default)
        .change_context(DeviceError::Decode {
            message: "invalid node device JSON".to_string(),
        })
        .attach_printable_lazy(|| encoded.to_string())
}

/// Picks the decoder by payload shape: JSON arrays start with `[`.
///
/// # Errors
///
/// - [`DeviceError::Decode`] if the selected decoder rejects the payload
pub fn decode_node_devices_auto(encoded: &str) -> Result<Vec<DeviceInfo>, Report<DeviceError>> {
    if encoded.trim_start().starts_with('[') {
        unmarshal_node_devices(encoded)
    } else {
        decode_node_devices(encoded)
    }
}

/// Decodes the device pairing annotation.
///
/// # Errors
///
/// - [`DeviceError::Decode`] if the payload is not a JSON pair score array
pub fn decode_pair_scores(encoded: &str) -> Result<DevicePairScores, Report<DeviceError>> {
    serde_json::from_str(encoded)
        .change_context(DeviceError::Decode {
            message: "invalid device pair scores".to_string(),
        })
        .attach_printable_lazy(|| encoded.to_string())
}

/// Strips the vendor prefix: `nvidia.com/gpumem` becomes `gpumem`.
pub fn resource_name(name: &str) -> &str {
    name.split_once('/').map_or(name, |(_, after)| after)
}

/// Keeps only the vendor prefix: `nvidia.com/gpumem` becomes `nvidia.com`.
pub fn vendor_name(name: &str) -> &str {
    name.split_once('/').map_or(name, |(before, _)| before)
}
