//! LVM Capacity Guard
//!
//! Keeps volume-backed workloads on node-local LVM storage from being
//! promised more capacity than their nodes have, and keeps logical volumes
//! from lagging behind the capacity their claims report.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── webhook ────────────────────────────┐
//! │  AdmissionReview ──► Decision Engine ──► Expansion Resolver      │
//! │                            │                  │                  │
//! │                            ▼                  ▼                  │
//! │                     Capacity Oracle    Cluster Object Store      │
//! │                    (Prometheus/fixed)     (Kubernetes API)       │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ lvm_vgs_total_free{node}
//! ┌─────────────────────────── node-agent ──────────────────────────┐
//! │  Capacity Collector ──► /metrics                                 │
//! │  Volume Reconciler  ──► LVM backend (vgs / lvs / lvextend)       │
//! │        ▲                                                         │
//! │  /restore-pvc-size, timer                                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`admission`]: expansion resolver, decision engine, webhook adapter
//! - [`capacity`]: capacity oracles
//! - [`reconciler`]: volume reconciler, namespace locks, capacity collector
//! - [`backends`]: LVM and Kubernetes adapters
//! - [`api`]: HTTP router and server
//! - [`crd`]: KubeBlocks resource types
//! - [`domain`]: core types and ports
//! - [`error`]: error types and handling

pub mod admission;
pub mod api;
pub mod backends;
pub mod capacity;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use admission::{
    AdmissionDecision, AdmissionEvent, DecisionEngine, EngineConfig, ExpansionResolver,
    ExpansionSource, Resolution, ShrinkAction, ShrinkPolicy,
};

pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use backends::{KubeObjectStore, LvmBackend, LvmConfig};

pub use capacity::{
    FixedOracle, OracleConfig, OracleFactory, PrometheusOracle, PrometheusOracleConfig,
};

pub use crd::{Cluster, ClusterSpec, OpsRequest, OpsRequestSpec, OpsType};

pub use domain::ports::{
    CapacityOracle, CapacityResult, ClusterObjectStore, ExpansionRequest, LogicalVolumeRecord,
    NodeId, ResourceKind, VolumeBackend, VolumeClaimRecord, VolumeGroupRecord,
};

pub use error::{DenialKind, Error, ErrorAction, Result};

pub use metrics::CapacityMetrics;

pub use reconciler::{
    LockMode, NamespaceLocks, NodeCapacityCollector, ReconcileReport, ReconcilerConfig,
    VolumeReconciler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
