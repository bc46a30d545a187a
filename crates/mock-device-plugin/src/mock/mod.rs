//! Mock device plugins: the per vendor registry and the kubelet facing server.

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod lister;
pub mod plugin;

pub use lister::MockLister;
pub use plugin::{MockPlugin, MockPluginService};

/// Version of the kubelet device plugin API served by the mock plugins.
pub const DEVICE_PLUGIN_API_VERSION: &str = "v1beta1";
/// Health reported for every advertised device.
pub const HEALTHY: &str = "Healthy";
