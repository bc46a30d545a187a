use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use notify::Config;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{PluginError, KUBELET_SOCKET};

/// Watches the device plugin directory for a (re)created `kubelet.sock`.
///
/// Every creation is reported on the returned channel; bursts collapse into a
/// single notification. The watcher stops when it is dropped.
///
/// # Errors
///
/// - [`PluginError::Watch`] if the directory cannot be watched
pub fn watch_kubelet_socket(
    device_plugin_path: &Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<()>), Report<PluginError>> {
    let watch_error = || PluginError::Watch {
        path: device_plugin_path.display().to_string(),
    };
    let (tx, rx) = mpsc::channel(1);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                debug!("Filesystem event: {:?}", event);
                if is_kubelet_socket_created(&event) {
                    // A pending notification already covers this one.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => error!("Filesystem watch error: {:?}", e),
        },
        Config::default(),
    )
    .change_context_lazy(watch_error)?;

    watcher
        .watch(device_plugin_path, RecursiveMode::NonRecursive)
        .change_context_lazy(watch_error)?;
    info!(path = %device_plugin_path.display(), "watching for kubelet restarts");
    Ok((watcher, rx))
}

fn is_kubelet_socket_created(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name().is_some_and(|name| name == KUBELET_SOCKET))
}
