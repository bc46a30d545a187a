use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::kubelet_watcher::watch_kubelet_socket;
use super::registration::register_with_kubelet;
use super::server::serve;
use super::{socket_file_name, PluginError, KUBELET_SOCKET};
use crate::mock::lister::PluginNameList;
use crate::mock::{MockLister, MockPlugin};

struct HostedPlugin {
    plugin: Arc<MockPlugin>,
    socket_path: PathBuf,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl HostedPlugin {
    async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            error!("plugin server task failed: {e}");
        }
        self.plugin.stop();
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(socket = %self.socket_path.display(), "failed to remove plugin socket: {e}");
            }
        }
    }
}

/// Serves the plugins of one vendor and keeps them registered with kubelet.
pub struct PluginManager {
    lister: Arc<MockLister>,
    device_plugin_path: PathBuf,
    hosted: BTreeMap<String, HostedPlugin>,
}

impl PluginManager {
    pub fn new(lister: Arc<MockLister>, device_plugin_path: impl Into<PathBuf>) -> Self {
        Self {
            lister,
            device_plugin_path: device_plugin_path.into(),
            hosted: BTreeMap::new(),
        }
    }

    fn kubelet_socket(&self) -> PathBuf {
        self.device_plugin_path.join(KUBELET_SOCKET)
    }

    fn full_resource_name(&self, resource: &str) -> String {
        format!("{}/{resource}", self.lister.resource_namespace())
    }

    /// Waits for discovered resources, hosts a plugin for each of them and
    /// re-registers everything whenever kubelet restarts.
    ///
    /// Returns once `cancellation_token` is cancelled, after every plugin has
    /// been stopped and its socket removed.
    pub async fn run(
        mut self,
        mut resource_update_rx: mpsc::Receiver<PluginNameList>,
        cancellation_token: CancellationToken,
    ) {
        let namespace = self.lister.resource_namespace().to_string();
        info!(%namespace, "running mock device plugin manager");

        let (_watcher, mut kubelet_restarts) = match watch_kubelet_socket(&self.device_plugin_path)
        {
            Ok((watcher, rx)) => (Some(watcher), rx),
            Err(e) => {
                warn!("kubelet restarts will not be detected: {e:?}");
                let (_tx, rx) = mpsc::channel(1);
                (None, rx)
            }
        };

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!(%namespace, "plugin manager shutdown requested");
                    break;
                }
                Some(names) = resource_update_rx.recv() => {
                    self.start_plugins(names, &cancellation_token).await;
                }
                Some(()) = kubelet_restarts.recv() => {
                    info!(%namespace, "kubelet socket created, re-registering plugins");
                    self.restart_plugins(&cancellation_token).await;
                }
            }
        }

        self.stop_all().await;
        info!(%namespace, "plugin manager stopped");
    }

    async fn start_plugins(&mut self, names: PluginNameList, cancellation_token: &CancellationToken) {
        for name in names {
            if self.hosted.contains_key(&name) {
                continue;
            }
            let plugin = self.lister.new_plugin(&name).await;
            plugin.start();
            match self.host(plugin, cancellation_token) {
                Ok(hosted) => {
                    self.register(&name).await;
                    self.hosted.insert(name, hosted);
                }
                Err(e) => error!("failed to host plugin {name}: {e:?}"),
            }
        }
    }

    async fn restart_plugins(&mut self, cancellation_token: &CancellationToken) {
        let hosted = std::mem::take(&mut self.hosted);
        for (name, previous) in hosted {
            let plugin = previous.plugin.clone();
            previous.stop().await;
            plugin.start();
            match self.host(plugin, cancellation_token) {
                Ok(hosted) => {
                    self.register(&name).await;
                    self.hosted.insert(name, hosted);
                }
                Err(e) => error!("failed to host plugin {name}: {e:?}"),
            }
        }
    }

    fn host(
        &self,
        plugin: Arc<MockPlugin>,
        cancellation_token: &CancellationToken,
    ) -> Result<HostedPlugin, Report<PluginError>> {
        let socket_path = self.device_plugin_path.join(socket_file_name(
            self.lister.resource_namespace(),
            plugin.managed_resource(),
        ));
        let shutdown = cancellation_token.child_token();
        let server = serve(plugin.clone(), &socket_path, shutdown.clone())?;
        Ok(HostedPlugin {
            plugin,
            socket_path,
            shutdown,
            server,
        })
    }

    /// Failures are logged; the next kubelet restart retries.
    async fn register(&self, resource: &str) {
        let endpoint = socket_file_name(self.lister.resource_namespace(), resource);
        if let Err(e) = register_with_kubelet(
            &self.kubelet_socket(),
            &endpoint,
            &self.full_resource_name(resource),
        )
        .await
        {
            error!("{e:?}");
        }
    }

    async fn stop_all(&mut self) {
        for (_, hosted) in std::mem::take(&mut self.hosted) {
            hosted.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::device::ResourceQuantityMap;

    #[test(tokio::test)]
    async fn hosts_discovered_resources_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (lister, rx) = MockLister::new("nvidia.com", Duration::from_secs(10));
        let token = CancellationToken::new();
        let manager = PluginManager::new(lister.clone(), dir.path());
        let task = tokio::spawn(manager.run(rx, token.clone()));

        lister
            .set_resource(ResourceQuantityMap::from([
                ("gpucores".to_string(), 300),
                ("gpumem".to_string(), 245760),
            ]))
            .await;

        let socket = dir.path().join("nvidia.com_gpumem.sock");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !socket.exists() || lister.plugins().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(dir.path().join("nvidia.com_gpucores.sock").exists());

        token.cancel();
        task.await.unwrap();
        assert!(!socket.exists());
        assert!(!dir.path().join("nvidia.com_gpucores.sock").exists());
        assert_eq!(lister.plugins().await.len(), 2);
    }

    #[test(tokio::test)]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hygon.com_dcumem.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let (lister, _rx) = MockLister::new("hygon.com", Duration::from_secs(10));
        let manager = PluginManager::new(lister.clone(), dir.path());
        let token = CancellationToken::new();
        let plugin = lister.new_plugin("dcumem").await;
        let hosted = manager.host(plugin, &token).unwrap();

        assert!(socket.exists());
        assert!(std::fs::read(&socket).is_err());
        hosted.stop().await;
        assert!(!socket.exists());
    }
}
