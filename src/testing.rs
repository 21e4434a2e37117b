//! In-memory fakes and fixtures for unit tests

use crate::crd::{
    Cluster, ClusterComponentSpec, ClusterSpec, OpsRequest, OpsRequestSpec, OpsType,
    OpsVolumeClaimTemplate, VolumeClaimTemplate, VolumeExpansion,
};
use crate::domain::ports::{
    CapacityOracle, CapacityResult, ClusterObjectStore, LogicalVolumeRecord, NodeId,
    VolumeBackend, VolumeClaimRecord, VolumeGroupRecord,
};
use crate::error::{Error, Result};
use crate::reconciler::RESIZE_OPERATION;
use crate::units::STORAGE_RESOURCE;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const GI: i64 = 1024 * 1024 * 1024;

// =============================================================================
// Fixtures
// =============================================================================

/// Cluster with one "mysql" component and a "data" template of `storage`
pub fn cluster(namespace: &str, name: &str, storage: &str) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            cluster_definition_ref: Some("apecloud-mysql".into()),
            component_specs: vec![ClusterComponentSpec {
                name: "mysql".into(),
                replicas: Some(3),
                volume_claim_templates: vec![VolumeClaimTemplate::with_storage("data", storage)],
                ..Default::default()
            }],
        },
    );
    cluster.metadata.namespace = Some(namespace.into());
    cluster
}

pub fn ops_request(
    namespace: &str,
    name: &str,
    cluster_ref: &str,
    component: &str,
    template: &str,
    storage: &str,
) -> OpsRequest {
    let mut ops = OpsRequest::new(
        name,
        OpsRequestSpec {
            cluster_ref: cluster_ref.into(),
            ops_type: OpsType::VolumeExpansion,
            volume_expansion: Some(vec![VolumeExpansion {
                component_name: component.into(),
                volume_claim_templates: vec![OpsVolumeClaimTemplate {
                    name: template.into(),
                    storage: storage.into(),
                }],
            }]),
        },
    );
    ops.metadata.namespace = Some(namespace.into());
    ops
}

/// StatefulSet selecting `labels` with one template of `storage`
pub fn stateful_set(
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    storage: &str,
    resize_annotation: Option<&str>,
) -> StatefulSet {
    let annotations = resize_annotation.map(|value| {
        let mut a = BTreeMap::new();
        a.insert(
            crate::admission::RESIZE_ANNOTATION.to_string(),
            value.to_string(),
        );
        a
    });
    let mut requests = BTreeMap::new();
    requests.insert(STORAGE_RESOURCE.to_string(), Quantity(storage.into()));

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            annotations,
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".into()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(requests),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Bound, settled claim on `node`
pub fn bound_claim(namespace: &str, volume: &str, node: &str, capacity: i64) -> VolumeClaimRecord {
    VolumeClaimRecord {
        namespace: namespace.into(),
        claim_name: format!("data-{}", volume),
        volume_name: volume.into(),
        bound_node: Some(node.into()),
        requested_capacity_bytes: capacity,
        status_capacity_bytes: capacity,
        phase: "Bound".into(),
    }
}

pub fn logical_volume(name: &str, size: i64) -> LogicalVolumeRecord {
    LogicalVolumeRecord {
        name: name.into(),
        volume_group: "lvmvg".into(),
        size_bytes: size,
    }
}

// =============================================================================
// Fake Capacity Oracle
// =============================================================================

/// Scripted answer for one node
#[derive(Debug, Clone)]
pub enum FakeAnswer {
    Free(i64),
    Unreachable,
    NoData,
    /// Never answers within any sane deadline
    Hang,
}

#[derive(Default)]
pub struct FakeOracle {
    answers: Mutex<HashMap<NodeId, FakeAnswer>>,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn with_free(nodes: &[(&str, i64)]) -> Self {
        let oracle = Self::default();
        for (node, free) in nodes {
            oracle.set(node, FakeAnswer::Free(*free));
        }
        oracle
    }

    pub fn set(&self, node: &str, answer: FakeAnswer) {
        self.answers.lock().insert(NodeId::from(node), answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapacityOracle for FakeOracle {
    async fn free_capacity(&self, node: &NodeId) -> Result<CapacityResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().get(node).cloned();
        match answer {
            Some(FakeAnswer::Free(free_bytes)) => Ok(CapacityResult {
                node: node.clone(),
                free_bytes,
            }),
            Some(FakeAnswer::Unreachable) => Err(Error::Query("connection refused".into())),
            Some(FakeAnswer::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Query("hung query returned".into()))
            }
            Some(FakeAnswer::NoData) | None => Err(Error::NoCapacityData {
                node: node.to_string(),
            }),
        }
    }

    fn mode(&self) -> &str {
        "fake"
    }
}

// =============================================================================
// Fake Cluster Object Store
// =============================================================================

#[derive(Default)]
pub struct FakeObjectStore {
    clusters: Mutex<HashMap<(String, String), Cluster>>,
    pods: Mutex<Vec<(String, BTreeMap<String, String>, String)>>,
    claims: Mutex<Vec<VolumeClaimRecord>>,
    fail_claims: Mutex<bool>,
    pod_list_calls: AtomicUsize,
}

impl FakeObjectStore {
    pub fn add_cluster(&self, cluster: Cluster) {
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();
        let name = cluster.metadata.name.clone().unwrap_or_default();
        self.clusters.lock().insert((namespace, name), cluster);
    }

    /// Register a pod; an empty node means unscheduled
    pub fn add_pod(&self, namespace: &str, labels: BTreeMap<String, String>, node: &str) {
        self.pods
            .lock()
            .push((namespace.into(), labels, node.into()));
    }

    pub fn add_claim(&self, claim: VolumeClaimRecord) {
        self.claims.lock().push(claim);
    }

    pub fn set_claim_status(&self, volume: &str, capacity: i64) {
        for claim in self.claims.lock().iter_mut() {
            if claim.volume_name == volume {
                claim.requested_capacity_bytes = capacity;
                claim.status_capacity_bytes = capacity;
            }
        }
    }

    pub fn fail_claim_listing(&self, fail: bool) {
        *self.fail_claims.lock() = fail;
    }

    pub fn pod_list_calls(&self) -> usize {
        self.pod_list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterObjectStore for FakeObjectStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .clusters
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_pod_nodes(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeId>> {
        self.pod_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|(ns, pod_labels, _)| {
                ns == namespace && labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .map(|(_, _, node)| NodeId::from(node.as_str()))
            .collect())
    }

    async fn list_volume_claims(&self) -> Result<Vec<VolumeClaimRecord>> {
        if *self.fail_claims.lock() {
            return Err(Error::Query("api server unavailable".into()));
        }
        Ok(self.claims.lock().clone())
    }
}

// =============================================================================
// Fake Volume Backend
// =============================================================================

#[derive(Default)]
pub struct FakeVolumeBackend {
    groups: Mutex<Vec<VolumeGroupRecord>>,
    volumes: Mutex<Vec<LogicalVolumeRecord>>,
    resizes: Mutex<Vec<(String, i64)>>,
    failing: Mutex<Option<String>>,
    resize_delay: Mutex<Option<Duration>>,
}

impl FakeVolumeBackend {
    pub fn with_volumes(volumes: Vec<LogicalVolumeRecord>) -> Self {
        let backend = Self::default();
        *backend.volumes.lock() = volumes;
        backend
    }

    pub fn add_group(&self, name: &str, size_bytes: i64, free_bytes: i64) {
        self.groups.lock().push(VolumeGroupRecord {
            name: name.into(),
            size_bytes,
            free_bytes,
        });
    }

    /// Make resizes of `volume` fail
    pub fn fail_resize_of(&self, volume: &str) {
        *self.failing.lock() = Some(volume.into());
    }

    pub fn delay_resizes(&self, delay: Duration) {
        *self.resize_delay.lock() = Some(delay);
    }

    /// Resizes performed so far, as (volume, target bytes)
    pub fn resizes(&self) -> Vec<(String, i64)> {
        self.resizes.lock().clone()
    }

    pub fn size_of(&self, volume: &str) -> Option<i64> {
        self.volumes
            .lock()
            .iter()
            .find(|v| v.name == volume)
            .map(|v| v.size_bytes)
    }
}

#[async_trait]
impl VolumeBackend for FakeVolumeBackend {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroupRecord>> {
        Ok(self.groups.lock().clone())
    }

    async fn list_logical_volumes(&self) -> Result<Vec<LogicalVolumeRecord>> {
        Ok(self.volumes.lock().clone())
    }

    async fn resize_volume(&self, volume: &LogicalVolumeRecord, target_bytes: i64) -> Result<()> {
        let delay = *self.resize_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().as_deref() == Some(volume.name.as_str()) {
            return Err(Error::BackendOperationFailed {
                backend: self.backend_name().into(),
                operation: RESIZE_OPERATION.into(),
                reason: "insufficient free extents".into(),
            });
        }

        self.resizes.lock().push((volume.name.clone(), target_bytes));
        for lv in self.volumes.lock().iter_mut() {
            if lv.name == volume.name {
                lv.size_bytes = target_bytes;
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "fake-lvm"
    }
}
