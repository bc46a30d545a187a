use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::MockPlugin;
use crate::device::ResourceQuantityMap;

/// Names of the resources found on the node, sent once to start their plugins.
pub type PluginNameList = Vec<String>;

#[derive(Debug, Default)]
struct ListerState {
    counts: ResourceQuantityMap,
    plugins: BTreeMap<String, Arc<MockPlugin>>,
    bootstrapped: bool,
}

/// Per vendor registry of resource quantities and the plugins serving them.
///
/// Counts and plugins live behind one lock, so a plugin created while an
/// update is applied sees either the old or the new counts, never a mix.
#[derive(Debug)]
pub struct MockLister {
    namespace: String,
    list_and_watch_interval: Duration,
    state: Mutex<ListerState>,
    resource_update_tx: mpsc::Sender<PluginNameList>,
}

impl MockLister {
    /// Creates the registry and the receiving half of its bootstrap channel.
    pub fn new(
        namespace: impl Into<String>,
        list_and_watch_interval: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<PluginNameList>) {
        let (resource_update_tx, resource_update_rx) = mpsc::channel(1);
        let lister = Arc::new(Self {
            namespace: namespace.into(),
            list_and_watch_interval,
            state: Mutex::new(ListerState::default()),
            resource_update_tx,
        });
        (lister, resource_update_rx)
    }

    /// Vendor prefix of the managed resources, e.g. `nvidia.com`.
    pub fn resource_namespace(&self) -> &str {
        &self.namespace
    }

    /// Applies the latest quantities.
    ///
    /// Before any plugin exists the resource names are announced once on the
    /// bootstrap channel, as soon as one of them has a positive quantity.
    /// Afterwards the quantities are written into the live plugins.
    pub async fn set_resource(&self, counts: ResourceQuantityMap) {
        if counts.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        state.counts = counts;

        if state.plugins.is_empty() {
            if state.bootstrapped {
                return;
            }
            let names: PluginNameList = state.counts.keys().cloned().collect();
            let discovered = state.counts.values().any(|count| *count > 0);
            if !discovered || names.is_empty() {
                debug!(namespace = %self.namespace, "no resource discovered yet");
                return;
            }
            match self.resource_update_tx.try_send(names) {
                Ok(()) => {
                    info!(namespace = %self.namespace, counts = ?state.counts, "new resources discovered");
                    state.bootstrapped = true;
                }
                Err(e) => {
                    warn!(namespace = %self.namespace, "failed to announce resources, retrying on next update: {e}");
                }
            }
            return;
        }

        let ListerState {
            counts, plugins, ..
        } = &*state;
        for (name, plugin) in plugins {
            if let Some(count) = counts.get(name) {
                if plugin.count() != *count {
                    info!(namespace = %self.namespace, resource = %name, count, "update plugin count");
                }
                plugin.set_count(*count);
            }
        }
    }

    /// Returns the plugin serving `resource_name`, creating it on first use.
    ///
    /// The plugin count is seeded from the latest quantities.
    pub async fn new_plugin(&self, resource_name: &str) -> Arc<MockPlugin> {
        let mut state = self.state.lock().await;
        let count = state.counts.get(resource_name).copied().unwrap_or(0);
        if let Some(plugin) = state.plugins.get(resource_name) {
            plugin.set_count(count);
            return plugin.clone();
        }
        let plugin = Arc::new(MockPlugin::new(
            resource_name,
            count,
            self.list_and_watch_interval,
        ));
        state
            .plugins
            .insert(resource_name.to_string(), plugin.clone());
        info!(namespace = %self.namespace, resource = %resource_name, count, "new plugin");
        plugin
    }

    /// Snapshot of the latest quantities.
    pub async fn counts(&self) -> ResourceQuantityMap {
        self.state.lock().await.counts.clone()
    }

    /// Live plugins, ordered by resource name.
    pub async fn plugins(&self) -> Vec<Arc<MockPlugin>> {
        self.state.lock().await.plugins.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn quantities(entries: &[(&str, i64)]) -> ResourceQuantityMap {
        entries
            .iter()
            .map(|(name, count)| (name.to_string(), *count))
            .collect()
    }

    fn lister() -> (Arc<MockLister>, mpsc::Receiver<PluginNameList>) {
        MockLister::new("nvidia.com", Duration::from_secs(10))
    }

    #[test(tokio::test)]
    async fn empty_map_is_a_no_op() {
        let (lister, mut rx) = lister();
        lister.set_resource(quantities(&[("gpumem", 10)])).await;
        assert_eq!(rx.try_recv().unwrap(), vec!["gpumem".to_string()]);

        lister.set_resource(ResourceQuantityMap::new()).await;
        assert_eq!(lister.counts().await, quantities(&[("gpumem", 10)]));
        assert!(rx.try_recv().is_err());
    }

    #[test(tokio::test)]
    async fn bootstrap_is_announced_once() {
        let (lister, mut rx) = lister();
        lister
            .set_resource(quantities(&[("gpucores", 300), ("gpumem", 245760)]))
            .await;
        lister
            .set_resource(quantities(&[("gpucores", 200), ("gpumem", 163840)]))
            .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            vec!["gpucores".to_string(), "gpumem".to_string()]
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(lister.counts().await["gpumem"], 163840);
    }

    #[test(tokio::test)]
    async fn all_zero_quantities_wait_for_discovery() {
        let (lister, mut rx) = lister();
        lister.set_resource(quantities(&[("gpumem", 0)])).await;
        assert!(rx.try_recv().is_err());

        lister.set_resource(quantities(&[("gpumem", 8)])).await;
        assert_eq!(rx.try_recv().unwrap(), vec!["gpumem".to_string()]);
    }

    #[test(tokio::test)]
    async fn full_channel_retries_on_next_update() {
        let (lister, mut rx) = MockLister::new("hygon.com", Duration::from_secs(10));
        lister
            .resource_update_tx
            .try_send(vec!["occupied".to_string()])
            .unwrap();

        lister.set_resource(quantities(&[("dcumem", 1)])).await;
        assert_eq!(rx.recv().await.unwrap(), vec!["occupied".to_string()]);

        lister.set_resource(quantities(&[("dcumem", 2)])).await;
        assert_eq!(rx.recv().await.unwrap(), vec!["dcumem".to_string()]);
    }

    #[test(tokio::test)]
    async fn new_plugin_seeds_count_and_is_idempotent() {
        let (lister, _rx) = lister();
        lister.set_resource(quantities(&[("gpumem", 245760)])).await;

        let plugin = lister.new_plugin("gpumem").await;
        assert_eq!(plugin.managed_resource(), "gpumem");
        assert_eq!(plugin.count(), 245760);

        let again = lister.new_plugin("gpumem").await;
        assert!(Arc::ptr_eq(&plugin, &again));
        assert_eq!(lister.plugins().await.len(), 1);

        let unknown = lister.new_plugin("gpucores").await;
        assert_eq!(unknown.count(), 0);
    }

    #[test(tokio::test)]
    async fn updates_after_bootstrap_are_applied_in_place() {
        let (lister, mut rx) = lister();
        lister.set_resource(quantities(&[("gpumem", 100)])).await;
        let names = rx.recv().await.unwrap();
        let plugin = lister.new_plugin(&names[0]).await;

        lister.set_resource(quantities(&[("gpumem", 40)])).await;

        assert_eq!(plugin.count(), 40);
        assert_eq!(lister.plugins().await.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn namespace_accessor() {
        let (lister, _rx) = MockLister::new("huawei.com", Duration::from_secs(10));
        assert_eq!(lister.resource_namespace(), "huawei.com");
    }
}
