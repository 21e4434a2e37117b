//! Domain Ports - Core trait definitions for the capacity guard
//!
//! These traits define the boundaries between the capacity logic and the
//! systems it consults: the metrics backend, the cluster object store and
//! the node's LVM volume backend. Adapters implement these traits.

use crate::crd::Cluster;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Node ID
// =============================================================================

/// Name of a cluster node
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Capacity Types
// =============================================================================

/// Free capacity of a node's volume groups at query time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityResult {
    pub node: NodeId,
    /// Always non-negative
    pub free_bytes: i64,
}

/// Resource kinds whose updates may grow a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cluster,
    OpsRequest,
    StatefulSet,
}

impl ResourceKind {
    /// Map an admission `kind` string onto a guarded kind
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Cluster" => Some(ResourceKind::Cluster),
            "OpsRequest" => Some(ResourceKind::OpsRequest),
            "StatefulSet" => Some(ResourceKind::StatefulSet),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cluster => write!(f, "Cluster"),
            ResourceKind::OpsRequest => write!(f, "OpsRequest"),
            ResourceKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Normalized view of one admission event that may grow storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRequest {
    pub namespace: String,
    pub name: String,
    pub kind: ResourceKind,
    /// Signed; negative means shrink
    pub requested_delta_bytes: i64,
    /// Nodes hosting the affected pods; empty means nothing to check
    pub target_nodes: Vec<NodeId>,
}

// =============================================================================
// Reconciler Types
// =============================================================================

/// Phase of a persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
    Unknown(String),
}

impl From<&str> for ClaimPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => ClaimPhase::Pending,
            "Bound" => ClaimPhase::Bound,
            "Lost" => ClaimPhase::Lost,
            other => ClaimPhase::Unknown(other.to_string()),
        }
    }
}

/// A persistent volume claim as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaimRecord {
    pub namespace: String,
    pub claim_name: String,
    /// Name of the bound volume; joins against logical volume names
    pub volume_name: String,
    /// Node selected by the scheduler, if any
    pub bound_node: Option<NodeId>,
    pub requested_capacity_bytes: i64,
    pub status_capacity_bytes: i64,
    pub phase: ClaimPhase,
}

impl VolumeClaimRecord {
    /// Bound, on `node`, and not mid-resize
    pub fn is_settled_on(&self, node: &NodeId) -> bool {
        self.phase == ClaimPhase::Bound
            && self.bound_node.as_ref() == Some(node)
            && !self.volume_name.is_empty()
            && self.requested_capacity_bytes == self.status_capacity_bytes
    }
}

/// A logical volume on the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeRecord {
    pub name: String,
    pub volume_group: String,
    pub size_bytes: i64,
}

/// A volume group on the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupRecord {
    pub name: String,
    pub size_bytes: i64,
    pub free_bytes: i64,
}

// =============================================================================
// Capacity Oracle Port
// =============================================================================

/// Port for free-capacity lookups
#[async_trait]
pub trait CapacityOracle: Send + Sync {
    /// Current free capacity of the node's volume groups.
    ///
    /// Fails for an empty node, an unreachable backend, or when no data
    /// exists for the node. Never answers zero in place of an error.
    async fn free_capacity(&self, node: &NodeId) -> Result<CapacityResult>;

    /// Oracle mode name, for logs
    fn mode(&self) -> &str;
}

// =============================================================================
// Cluster Object Store Port
// =============================================================================

/// Port for read-only cluster lookups
#[async_trait]
pub trait ClusterObjectStore: Send + Sync {
    /// Fetch a KubeBlocks cluster; `None` when it does not exist
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    /// Nodes of pods in `namespace` matching every label in `labels`.
    ///
    /// Unscheduled pods are omitted.
    async fn list_pod_nodes(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeId>>;

    /// All persistent volume claims in the cluster
    async fn list_volume_claims(&self) -> Result<Vec<VolumeClaimRecord>>;
}

// =============================================================================
// Volume Backend Port
// =============================================================================

/// Port for node-local logical volume management
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroupRecord>>;

    async fn list_logical_volumes(&self) -> Result<Vec<LogicalVolumeRecord>>;

    /// Grow `volume` to `target_bytes`
    async fn resize_volume(&self, volume: &LogicalVolumeRecord, target_bytes: i64) -> Result<()>;

    /// Backend name, for logs and errors
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CapacityOracleRef = Arc<dyn CapacityOracle>;
pub type ClusterObjectStoreRef = Arc<dyn ClusterObjectStore>;
pub type VolumeBackendRef = Arc<dyn VolumeBackend>;
