use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::info;

use super::PluginError;
use crate::mock::api::registration_client::RegistrationClient;
use crate::mock::api::DevicePluginOptions;
use crate::mock::api::RegisterRequest;
use crate::mock::DEVICE_PLUGIN_API_VERSION;

/// Announces the plugin listening on `endpoint` to kubelet.
///
/// `endpoint` is the socket file name relative to the device plugin
/// directory, `resource_name` the fully qualified resource.
///
/// # Errors
///
/// - [`PluginError::Registration`] if kubelet cannot be reached or rejects
///   the request
pub async fn register_with_kubelet(
    kubelet_socket: &Path,
    endpoint: &str,
    resource_name: &str,
) -> Result<(), Report<PluginError>> {
    info!(kubelet = %kubelet_socket.display(), %resource_name, "registering device plugin with kubelet");
    let registration_error = || PluginError::Registration {
        resource: resource_name.to_string(),
    };

    let channel = create_uds_channel(kubelet_socket.to_path_buf())
        .await
        .change_context_lazy(registration_error)?;
    let mut client = RegistrationClient::new(channel);

    let request = RegisterRequest {
        version: DEVICE_PLUGIN_API_VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: Some(DevicePluginOptions::default()),
    };
    client
        .register(Request::new(request))
        .await
        .change_context_lazy(registration_error)?;

    info!(%resource_name, "successfully registered device plugin with kubelet");
    Ok(())
}

/// Connects a gRPC channel to a unix socket.
pub(crate) async fn create_uds_channel(
    socket_path: PathBuf,
) -> Result<Channel, tonic::transport::Error> {
    // The URI is a placeholder, the connector always dials the socket.
    Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                match UnixStream::connect(socket_path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }))
        .await
}
