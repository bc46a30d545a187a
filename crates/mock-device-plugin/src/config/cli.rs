use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use utils::logging::LogFormat;
use utils::version;

#[derive(Parser, Clone, Debug)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "DEVICE_CONFIG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Path of the device config YAML, e.g. /config/device-config.yaml"
    )]
    pub device_config_file: PathBuf,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Name of the node whose devices are mocked"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the kubeconfig file (optional, defaults to in-cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value = "/var/lib/kubelet/device-plugins",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory holding kubelet.sock and the plugin sockets"
    )]
    pub device_plugin_path: PathBuf,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds between two reads of the node object"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between two device list pushes to kubelet"
    )]
    pub list_and_watch_interval_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn list_and_watch_interval(&self) -> Duration {
        Duration::from_secs(self.list_and_watch_interval_secs.max(1))
    }
}
