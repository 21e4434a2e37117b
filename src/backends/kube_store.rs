//! Cluster object store over the Kubernetes API

use crate::crd::Cluster;
use crate::domain::ports::{ClaimPhase, ClusterObjectStore, NodeId, VolumeClaimRecord};
use crate::error::{Error, Result};
use crate::units::storage_bytes;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Annotation the scheduler sets on a claim once its node is chosen
pub const SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";

pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `k1=v1,k2=v2` selector for `labels`
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert a claim into the reconciler's view of it
pub fn claim_record(pvc: &PersistentVolumeClaim) -> Result<VolumeClaimRecord> {
    let namespace = pvc.namespace().unwrap_or_default();
    let claim_name = pvc.name_any();
    let invalid = |e: Error| {
        Error::Validation(format!(
            "pvc {}/{} has an invalid capacity: {}",
            namespace, claim_name, e
        ))
    };

    let spec = pvc.spec.as_ref();
    let status = pvc.status.as_ref();

    let requested = storage_bytes(
        spec.and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref()),
    )
    .map_err(invalid)?;
    let actual = storage_bytes(status.and_then(|s| s.capacity.as_ref())).map_err(invalid)?;

    let bound_node = pvc
        .annotations()
        .get(SELECTED_NODE_ANNOTATION)
        .filter(|n| !n.is_empty())
        .map(|n| NodeId::new(n.as_str()));

    Ok(VolumeClaimRecord {
        volume_name: spec
            .and_then(|s| s.volume_name.clone())
            .unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(ClaimPhase::from)
            .unwrap_or(ClaimPhase::Pending),
        requested_capacity_bytes: requested,
        status_capacity_bytes: actual,
        bound_node,
        namespace,
        claim_name,
    })
}

#[async_trait]
impl ClusterObjectStore for KubeObjectStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pod_nodes(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeId>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = label_selector(labels);
        let pods = api.list(&ListParams::default().labels(&selector)).await?;

        let nodes: Vec<NodeId> = pods
            .items
            .iter()
            .filter_map(|pod| pod.spec.as_ref()?.node_name.clone())
            .filter(|n| !n.is_empty())
            .map(NodeId::from)
            .collect();
        debug!(
            namespace,
            selector = %selector,
            pods = pods.items.len(),
            nodes = nodes.len(),
            "Listed pod nodes"
        );
        Ok(nodes)
    }

    async fn list_volume_claims(&self) -> Result<Vec<VolumeClaimRecord>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let claims = api.list(&ListParams::default()).await?;

        Ok(claims
            .items
            .iter()
            .filter_map(|pvc| match claim_record(pvc) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping claim");
                    None
                }
            })
            .collect())
    }
}
