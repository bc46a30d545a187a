//! Mock kubelet device plugins for heterogeneous accelerators.
//!
//! Reads the devices a node agent published on the node object and
//! advertises them to kubelet as synthetic, always healthy devices, so the
//! scheduler can be exercised without real hardware.

pub mod config;
pub mod device;
pub mod k8s;
pub mod manager;
pub mod mock;
