//! Kubernetes integration: client construction and node lookups.

use core::error::Error;

pub mod kube_client;
pub mod node_source;

pub use kube_client::init_kube_client;
pub use node_source::{KubeNodeSource, NodeSource};

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to fetch node {node_name}")]
    NodeFetchFailed { node_name: String },
}

impl Error for KubernetesError {}
