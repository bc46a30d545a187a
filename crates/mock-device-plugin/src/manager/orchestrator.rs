use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ManagerOptions, PluginManager};
use crate::device::Devices;
use crate::k8s::NodeSource;
use crate::mock::MockLister;

/// Polls the node every `interval` and hands the vendor's quantities to `lister`.
///
/// A failed node lookup is logged and retried on the next tick.
pub async fn register<S>(
    node_source: &S,
    devices: &dyn Devices,
    lister: &MockLister,
    interval: Duration,
    cancellation_token: CancellationToken,
) where
    S: NodeSource + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!(vendor = devices.common_word(), "node polling stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        match node_source.get_node().await {
            Ok(node) => lister.set_resource(devices.get_resource(&node)).await,
            Err(e) => error!(vendor = devices.common_word(), "Get node error: {e:?}"),
        }
    }
}

/// Starts one worker per vendor and waits until all of them have finished.
///
/// Each worker polls the node into its own [`MockLister`] and runs a
/// [`PluginManager`] on the lister's bootstrap channel. Workers only finish
/// when `cancellation_token` is cancelled.
pub async fn run_managers(
    devices: BTreeMap<String, Arc<dyn Devices>>,
    node_source: Arc<dyn NodeSource>,
    options: ManagerOptions,
    cancellation_token: CancellationToken,
) {
    if devices.is_empty() {
        warn!("no device configured, nothing to mock");
    }

    let mut completions = Vec::with_capacity(devices.len());
    for (common_word, dev) in devices {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        completions.push((common_word.clone(), done_rx));

        let (lister, resource_update_rx) =
            MockLister::new(dev.resource_namespace(), options.list_and_watch_interval);
        info!(vendor = %common_word, namespace = %lister.resource_namespace(), "running mocking dp");

        let poller = {
            let lister = lister.clone();
            let node_source = node_source.clone();
            let token = cancellation_token.clone();
            let interval = options.poll_interval;
            tokio::spawn(async move {
                register(node_source.as_ref(), dev.as_ref(), &lister, interval, token).await;
            })
        };

        let manager = PluginManager::new(lister, options.device_plugin_path.clone());
        let token = cancellation_token.clone();
        tokio::spawn(async move {
            manager.run(resource_update_rx, token).await;
            if let Err(e) = poller.await {
                error!("node polling task failed: {e}");
            }
            let _ = done_tx.send(());
        });
    }

    for (common_word, done_rx) in completions {
        if done_rx.await.is_err() {
            error!(vendor = %common_word, "vendor worker exited without signalling completion");
        }
    }
    info!("all device managers stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use error_stack::Report;
    use k8s_openapi::api::core::v1::Node;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::device::hygon::{DcuDevices, HygonConfig, REGISTER_ANNOS};
    use crate::device::node::fixtures::node;
    use crate::k8s::KubernetesError;

    struct StaticNode {
        node: Option<Node>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NodeSource for StaticNode {
        async fn get_node(&self) -> Result<Node, Report<KubernetesError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.node.clone().ok_or_else(|| {
                Report::new(KubernetesError::NodeFetchFailed {
                    node_name: "missing".to_string(),
                })
            })
        }
    }

    fn hygon() -> Arc<dyn Devices> {
        Arc::new(DcuDevices::new(HygonConfig {
            resource_memory_name: "hygon.com/dcumem".to_string(),
            ..Default::default()
        }))
    }

    fn hygon_node() -> Node {
        let record = "DCU-0,4,65520,100,DCU-K100_AI,0,true:";
        node("hygon-node", &[(REGISTER_ANNOS, &record.repeat(6))], &[])
    }

    #[test(tokio::test(start_paused = true))]
    async fn register_feeds_lister_every_interval() {
        let source = StaticNode {
            node: Some(hygon_node()),
            calls: AtomicUsize::new(0),
        };
        let dev = hygon();
        let (lister, mut rx) = MockLister::new("hygon.com", Duration::from_secs(10));
        let token = CancellationToken::new();

        let polling = register(&source, dev.as_ref(), &lister, Duration::from_secs(30), token.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_secs(65)).await;
            token.cancel();
        };
        tokio::join!(polling, stop);

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(rx.try_recv().unwrap(), vec!["dcumem".to_string()]);
        assert_eq!(lister.counts().await["dcumem"], 393120);
    }

    #[test(tokio::test(start_paused = true))]
    async fn register_survives_node_errors() {
        let source = StaticNode {
            node: None,
            calls: AtomicUsize::new(0),
        };
        let dev = hygon();
        let (lister, mut rx) = MockLister::new("hygon.com", Duration::from_secs(10));
        let token = CancellationToken::new();

        let polling = register(&source, dev.as_ref(), &lister, Duration::from_secs(30), token.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_secs(35)).await;
            token.cancel();
        };
        tokio::join!(polling, stop);

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(rx.try_recv().is_err());
        assert!(lister.counts().await.is_empty());
    }

    #[test(tokio::test)]
    async fn run_managers_returns_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn NodeSource> = Arc::new(StaticNode {
            node: Some(hygon_node()),
            calls: AtomicUsize::new(0),
        });
        let devices = BTreeMap::from([("DCU".to_string(), hygon())]);
        let options = ManagerOptions {
            device_plugin_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let run = tokio::spawn(run_managers(devices, source, options, token.clone()));

        let socket = dir.path().join("hygon.com_dcumem.sock");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !socket.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(!socket.exists());
    }
}
