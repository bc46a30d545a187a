//! Accessors for the node fields the vendor adapters read.

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;

use super::DeviceError;

/// Returns the node name, or an empty string for unnamed fixtures.
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Looks up a string annotation.
pub fn annotation<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Looks up a string label.
pub fn label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

/// Looks up a register annotation that must be present.
///
/// # Errors
///
/// - [`DeviceError::NotFound`] if the annotation is absent
pub fn required_annotation<'a>(node: &'a Node, key: &str) -> Result<&'a str, Report<DeviceError>> {
    annotation(node, key).ok_or_else(|| {
        Report::new(DeviceError::NotFound {
            key: key.to_string(),
        })
    })
}

/// Reads `status.capacity[key]` as an integer.
///
/// Returns `None` when the entry is absent or is not a whole number.
pub fn capacity_as_i64(node: &Node, key: &str) -> Option<i64> {
    node.status
        .as_ref()
        .and_then(|status| status.capacity.as_ref())
        .and_then(|capacity| capacity.get(key))
        .and_then(|quantity| parse_quantity(&quantity.0))
}

/// Upper bound on the devices fabricated from one capacity entry.
pub const MAX_DEVICES_PER_NODE: u32 = 1024;

/// Reads a device count capacity entry that must be present and non-zero.
///
/// # Errors
///
/// - [`DeviceError::NotFound`] if the entry is absent, not an integer or zero
/// - [`DeviceError::Decode`] if the entry exceeds [`MAX_DEVICES_PER_NODE`]
pub fn required_device_count(node: &Node, key: &str) -> Result<u32, Report<DeviceError>> {
    let count = match capacity_as_i64(node, key) {
        Some(count) if count > 0 => count,
        _ => {
            return Err(Report::new(DeviceError::NotFound {
                key: key.to_string(),
            }))
        }
    };
    match u32::try_from(count) {
        Ok(count) if count <= MAX_DEVICES_PER_NODE => Ok(count),
        _ => Err(Report::new(DeviceError::Decode {
            message: format!(
                "{key} reports {count} devices, at most {MAX_DEVICES_PER_NODE} supported"
            ),
        })),
    }
}

/// Parses a Kubernetes quantity string into a whole number.
///
/// Supports plain numbers, decimal SI suffixes (`k`, `M`, `G`, `T`, `P`, `E`),
/// binary suffixes (`Ki` .. `Ei`), milli values (`m`) and exponent notation.
pub(crate) fn parse_quantity(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(plain) = value.parse::<i64>() {
        return Some(plain);
    }

    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    if suffix == "m" {
        return whole(number.parse::<f64>().ok()? / 1000.0);
    }
    let multiplier: f64 = match suffix {
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        _ => {
            let scientific = value.parse::<f64>().ok()?;
            return whole(scientific);
        }
    };
    let number = number.parse::<f64>().ok()?;
    whole(number * multiplier)
}

fn whole(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}
