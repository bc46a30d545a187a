//! Hosting of the mock plugins and supervision of the per vendor workers.
//!
//! - [`PluginManager`] serves the plugins of one vendor on unix sockets and
//!   registers them with kubelet
//! - [`register`] polls the node and feeds the vendor's [`crate::mock::MockLister`]
//! - [`run_managers`] starts both for every configured vendor

use core::error::Error;
use std::path::PathBuf;
use std::time::Duration;

pub mod kubelet_watcher;
pub mod orchestrator;
pub mod plugin_manager;
pub mod registration;
pub mod server;

pub use orchestrator::{register, run_managers};
pub use plugin_manager::PluginManager;

/// File name of the kubelet registration socket.
pub const KUBELET_SOCKET: &str = "kubelet.sock";
pub const DEFAULT_DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";

/// Errors raised while hosting a plugin.
#[derive(Debug, derive_more::Display)]
pub enum PluginError {
    #[display("Failed to prepare plugin socket: {path}")]
    Socket { path: String },
    #[display("Plugin server failed for resource {resource}")]
    Serve { resource: String },
    #[display("Failed to register {resource} with kubelet")]
    Registration { resource: String },
    #[display("Failed to watch kubelet socket directory: {path}")]
    Watch { path: String },
}

impl Error for PluginError {}

/// Settings shared by every vendor worker.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Directory holding `kubelet.sock` and the plugin sockets.
    pub device_plugin_path: PathBuf,
    pub poll_interval: Duration,
    pub list_and_watch_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            device_plugin_path: PathBuf::from(DEFAULT_DEVICE_PLUGIN_PATH),
            poll_interval: Duration::from_secs(30),
            list_and_watch_interval: Duration::from_secs(10),
        }
    }
}

/// Socket file name of a plugin: `<namespace>_<resource>.sock`.
pub fn socket_file_name(namespace: &str, resource: &str) -> String {
    format!("{namespace}_{resource}.sock")
}
