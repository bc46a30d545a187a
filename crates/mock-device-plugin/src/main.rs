use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mock_device_plugin::config::{init_devices, load_config, Cli};
use mock_device_plugin::k8s::{init_kube_client, KubeNodeSource, NodeSource};
use mock_device_plugin::manager::{run_managers, ManagerOptions};
use tokio_util::sync::CancellationToken;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

/// Cancels `token` on SIGTERM or SIGINT.
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init(cli.log_format);
    tracing::info!("Starting mock device plugin {}", &**version::VERSION);

    let config = load_config(&cli.device_config_file)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let devices = init_devices(&config);

    let client = init_kube_client(cli.kubeconfig.clone())
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let node_source: Arc<dyn NodeSource> = Arc::new(KubeNodeSource::new(client, &cli.node_name));

    let cancellation_token = CancellationToken::new();
    spawn_signal_handler(cancellation_token.clone())?;

    let options = ManagerOptions {
        device_plugin_path: cli.device_plugin_path.clone(),
        poll_interval: cli.poll_interval(),
        list_and_watch_interval: cli.list_and_watch_interval(),
    };
    run_managers(devices, node_source, options, cancellation_token).await;

    tracing::info!("Mock device plugin stopped");
    Ok(())
}
