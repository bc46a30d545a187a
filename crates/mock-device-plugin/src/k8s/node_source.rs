use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::Client;

use crate::k8s::KubernetesError;

/// Supplies the current object of the node this process runs on.
#[async_trait::async_trait]
pub trait NodeSource: Send + Sync {
    /// # Errors
    ///
    /// - [`KubernetesError::NodeFetchFailed`] if the node cannot be read
    async fn get_node(&self) -> Result<Node, Report<KubernetesError>>;
}

/// Reads the node from the cluster API.
#[derive(Clone)]
pub struct KubeNodeSource {
    api: Api<Node>,
    node_name: String,
}

impl KubeNodeSource {
    pub fn new(client: Client, node_name: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            node_name: node_name.into(),
        }
    }
}

#[async_trait::async_trait]
impl NodeSource for KubeNodeSource {
    async fn get_node(&self) -> Result<Node, Report<KubernetesError>> {
        self.api.get(&self.node_name).await.map_err(|e| {
            Report::new(KubernetesError::NodeFetchFailed {
                node_name: self.node_name.clone(),
            })
            .attach_printable(format!("Kubernetes API error: {e}"))
        })
    }
}
