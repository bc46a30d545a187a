use std::pin::Pin;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;

use super::api;
use super::api::device_plugin_server::DevicePlugin;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::ContainerAllocateResponse;
use super::api::DevicePluginOptions;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use super::HEALTHY;

/// Advertises `count` synthetic devices for one resource.
///
/// The count is shared with the registry, which updates it in place so that
/// open `ListAndWatch` streams pick up the new value on their next tick.
#[derive(Debug)]
pub struct MockPlugin {
    managed_resource: String,
    count: AtomicI64,
    list_and_watch_interval: Duration,
}

impl MockPlugin {
    pub fn new(
        managed_resource: impl Into<String>,
        count: i64,
        list_and_watch_interval: Duration,
    ) -> Self {
        Self {
            managed_resource: managed_resource.into(),
            count: AtomicI64::new(count),
            list_and_watch_interval,
        }
    }

    pub fn managed_resource(&self) -> &str {
        &self.managed_resource
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn set_count(&self, count: i64) {
        self.count.store(count, Ordering::Release);
    }

    /// Runs before the plugin is registered with kubelet.
    pub fn start(&self) {
        info!(resource = %self.managed_resource, "mock plugin start");
    }

    /// Runs after the plugin server has stopped.
    pub fn stop(&self) {
        info!(resource = %self.managed_resource, "mock plugin stop");
    }

    /// Current device list, `mock-devices-id-0` .. `mock-devices-id-<count-1>`.
    pub fn devices(&self) -> Vec<api::Device> {
        (0..self.count().max(0))
            .map(|i| api::Device {
                id: format!("mock-devices-id-{i}"),
                health: HEALTHY.to_string(),
                topology: None,
            })
            .collect()
    }
}

/// gRPC face of a [`MockPlugin`].
#[derive(Debug, Clone)]
pub struct MockPluginService {
    plugin: Arc<MockPlugin>,
    cancellation_token: CancellationToken,
}

impl MockPluginService {
    pub fn new(plugin: Arc<MockPlugin>, cancellation_token: CancellationToken) -> Self {
        Self {
            plugin,
            cancellation_token,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for MockPluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(DevicePluginOptions::default()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        let (tx, rx) = mpsc::channel(1);
        let plugin = self.plugin.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            info!(
                resource = %plugin.managed_resource,
                count = plugin.count(),
                "device registered"
            );
            let mut ticker = tokio::time::interval(plugin.list_and_watch_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // The first tick completes immediately.
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let response = ListAndWatchResponse {
                    devices: plugin.devices(),
                };
                if tx.send(Ok(response)).await.is_err() {
                    debug!(resource = %plugin.managed_resource, "list and watch receiver closed");
                    break;
                }
            }
            info!(resource = %plugin.managed_resource, "list and watch stopped");
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        debug!("getting preferred allocation: {:?}", request.into_inner());
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!(
            resource = %self.plugin.managed_resource,
            containers = req.container_requests.len(),
            "into allocate"
        );
        let container_responses = req
            .container_requests
            .iter()
            .map(|_| ContainerAllocateResponse::default())
            .collect();
        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        debug!("pre-start container: {:?}", request.into_inner());
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
