use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::PluginError;
use crate::mock::api::device_plugin_server::DevicePluginServer;
use crate::mock::{MockPlugin, MockPluginService};

/// Binds `socket_path` and serves `plugin` until `shutdown` is cancelled.
///
/// A stale socket file left by a previous run is removed first. The returned
/// task resolves once the server has stopped.
///
/// # Errors
///
/// - [`PluginError::Socket`] if the stale socket cannot be removed or the
///   listener cannot be bound
pub fn serve(
    plugin: Arc<MockPlugin>,
    socket_path: &Path,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, Report<PluginError>> {
    let socket_error = || PluginError::Socket {
        path: socket_path.display().to_string(),
    };

    if socket_path.exists() {
        std::fs::remove_file(socket_path).change_context_lazy(socket_error)?;
    }
    let listener = UnixListener::bind(socket_path).change_context_lazy(socket_error)?;
    info!(socket = %socket_path.display(), resource = %plugin.managed_resource(), "gRPC server is bound");

    let resource = plugin.managed_resource().to_string();
    let service = MockPluginService::new(plugin, shutdown.clone());
    Ok(tokio::spawn(async move {
        let result = tonic::transport::Server::builder()
            .add_service(DevicePluginServer::new(service))
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::UnixListenerStream::new(listener),
                async move {
                    shutdown.cancelled().await;
                },
            )
            .await
            .change_context(PluginError::Serve {
                resource: resource.clone(),
            });
        match result {
            Ok(()) => info!(%resource, "gRPC server stopped"),
            Err(e) => error!("{e:?}"),
        }
    }))
}
