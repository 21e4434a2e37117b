//! Expansion-Delta Resolver
//!
//! Turns each request shape into an [`ExpansionRequest`]: the signed number
//! of bytes being asked for and the nodes the affected pods run on. Each
//! shape has its own resolution rule; there is no generic diffing.

use crate::crd::{cluster_pod_labels, Cluster, OpsRequest, OpsType};
use crate::domain::ports::{ClusterObjectStoreRef, ExpansionRequest, NodeId, ResourceKind};
use crate::error::{Error, Result};
use crate::units::{format_quantity, parse_quantity, storage_bytes};
use k8s_openapi::api::apps::v1::StatefulSet;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Annotation carrying the target size of a workload's volumes
pub const RESIZE_ANNOTATION: &str = "deploy.cloud.sealos.io/resize";

// =============================================================================
// Shrink Policy
// =============================================================================

/// What to do with a request that shrinks storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkAction {
    /// Deny as a validation error
    Reject,
    /// Let it through without a capacity check
    Allow,
}

/// Shrink handling per resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkPolicy {
    pub cluster: ShrinkAction,
    pub ops_request: ShrinkAction,
    pub workload: ShrinkAction,
}

impl Default for ShrinkPolicy {
    fn default() -> Self {
        Self {
            cluster: ShrinkAction::Reject,
            ops_request: ShrinkAction::Allow,
            workload: ShrinkAction::Allow,
        }
    }
}

impl ShrinkPolicy {
    pub fn for_kind(&self, kind: ResourceKind) -> ShrinkAction {
        match kind {
            ResourceKind::Cluster => self.cluster,
            ResourceKind::OpsRequest => self.ops_request,
            ResourceKind::StatefulSet => self.workload,
        }
    }
}

// =============================================================================
// Request Shapes
// =============================================================================

/// The shapes an expansion request can arrive in
#[derive(Debug, Clone)]
pub enum ExpansionSource {
    /// Update of a cluster spec; compared old against new
    ClusterSpec { old: Box<Cluster>, new: Box<Cluster> },
    /// Explicit volume expansion operation
    OpsRequest(Box<OpsRequest>),
    /// Workload carrying the resize annotation
    Workload(Box<StatefulSet>),
}

impl ExpansionSource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ExpansionSource::ClusterSpec { .. } => ResourceKind::Cluster,
            ExpansionSource::OpsRequest(_) => ResourceKind::OpsRequest,
            ExpansionSource::Workload(_) => ResourceKind::StatefulSet,
        }
    }
}

/// Outcome of resolving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not an expansion event; nothing to check
    Skip(String),
    /// Normalized expansion request
    Expansion(ExpansionRequest),
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves request shapes against the live cluster state
pub struct ExpansionResolver {
    store: ClusterObjectStoreRef,
    shrink: ShrinkPolicy,
}

impl ExpansionResolver {
    pub fn new(store: ClusterObjectStoreRef, shrink: ShrinkPolicy) -> Self {
        Self { store, shrink }
    }

    /// Resolve `source`, the object `namespace/name` of the admission event
    pub async fn resolve(
        &self,
        namespace: &str,
        name: &str,
        source: &ExpansionSource,
    ) -> Result<Resolution> {
        match source {
            ExpansionSource::ClusterSpec { old, new } => {
                self.resolve_cluster(namespace, name, old, new).await
            }
            ExpansionSource::OpsRequest(ops) => {
                self.resolve_ops_request(namespace, name, ops).await
            }
            ExpansionSource::Workload(sts) => self.resolve_workload(namespace, name, sts).await,
        }
    }

    async fn resolve_cluster(
        &self,
        namespace: &str,
        name: &str,
        old: &Cluster,
        new: &Cluster,
    ) -> Result<Resolution> {
        let new_template = match new.spec.primary_template() {
            Some(t) => t,
            None => return Ok(Resolution::Skip("cluster has no volume claim templates".into())),
        };
        let new_bytes = new_template.storage_bytes()?;
        let old_bytes = match old.spec.primary_template() {
            Some(t) => t.storage_bytes()?,
            None => 0,
        };
        let delta = storage_delta(ResourceKind::Cluster, namespace, name, new_bytes, old_bytes)?;

        self.finish(
            ResourceKind::Cluster,
            namespace,
            name,
            delta,
            &cluster_pod_labels(name),
        )
        .await
    }

    async fn resolve_ops_request(
        &self,
        namespace: &str,
        name: &str,
        ops: &OpsRequest,
    ) -> Result<Resolution> {
        if ops.spec.ops_type != OpsType::VolumeExpansion {
            return Ok(Resolution::Skip(format!(
                "ops request type {} is not a volume expansion",
                ops.spec.ops_type
            )));
        }
        let (expansion, template) = match ops.spec.first_expansion() {
            Some(first) => first,
            None => {
                return Ok(Resolution::Skip(
                    "ops request has no volume expansion entries".into(),
                ))
            }
        };

        let requested = parse_quantity(&template.storage).map_err(|e| {
            Error::Validation(format!(
                "OpsRequest {}/{} requests an invalid storage size {:?}: {}",
                namespace, name, template.storage, e
            ))
        })?;

        let cluster_ref = &ops.spec.cluster_ref;
        let cluster = self
            .store
            .get_cluster(namespace, cluster_ref)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Cluster".into(),
                name: format!("{}/{}", namespace, cluster_ref),
            })?;

        let component = cluster
            .spec
            .component(&expansion.component_name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "component".into(),
                name: format!(
                    "{} of cluster {}/{}",
                    expansion.component_name, namespace, cluster_ref
                ),
            })?;
        let current = component
            .template(&template.name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "volume claim template".into(),
                name: format!(
                    "{} of component {} in cluster {}/{}",
                    template.name, component.name, namespace, cluster_ref
                ),
            })?
            .storage_bytes()?;
        let delta =
            storage_delta(ResourceKind::OpsRequest, namespace, name, requested, current)?;

        self.finish(
            ResourceKind::OpsRequest,
            namespace,
            name,
            delta,
            &cluster_pod_labels(cluster_ref),
        )
        .await
    }

    async fn resolve_workload(
        &self,
        namespace: &str,
        name: &str,
        sts: &StatefulSet,
    ) -> Result<Resolution> {
        let spec = match sts.spec.as_ref() {
            Some(spec) => spec,
            None => return Ok(Resolution::Skip("workload has no spec".into())),
        };
        let template = match spec.volume_claim_templates.as_ref().and_then(|t| t.first()) {
            Some(t) => t,
            None => return Ok(Resolution::Skip("workload has no volume claim templates".into())),
        };
        if sts.metadata.labels.is_none() {
            return Ok(Resolution::Skip("workload has no labels".into()));
        }

        let annotation = sts
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RESIZE_ANNOTATION))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        let annotation = match annotation {
            Some(a) => a,
            None => {
                debug!(namespace, name, "Resize annotation is empty");
                return Ok(Resolution::Skip("resize annotation is empty".into()));
            }
        };

        let requested = parse_quantity(annotation).map_err(|e| {
            Error::Validation(format!(
                "StatefulSet {}/{} has a malformed {} annotation {:?}: {}",
                namespace, name, RESIZE_ANNOTATION, annotation, e
            ))
        })?;
        let current = storage_bytes(
            template
                .spec
                .as_ref()
                .and_then(|s| s.resources.as_ref())
                .and_then(|r| r.requests.as_ref()),
        )
        .map_err(|e| {
            Error::Validation(format!(
                "StatefulSet {}/{} has an invalid volume claim template request: {}",
                namespace, name, e
            ))
        })?;

        let delta =
            storage_delta(ResourceKind::StatefulSet, namespace, name, requested, current)?;

        let selector = spec.selector.match_labels.clone().unwrap_or_default();
        self.finish(
            ResourceKind::StatefulSet,
            namespace,
            name,
            delta,
            &selector,
        )
        .await
    }

    /// Apply the shrink policy and look up target nodes for a growing request
    async fn finish(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        delta: i64,
        pod_labels: &BTreeMap<String, String>,
    ) -> Result<Resolution> {
        if delta == 0 {
            return Ok(Resolution::Skip("storage request unchanged".into()));
        }
        if delta < 0 && self.shrink.for_kind(kind) == ShrinkAction::Reject {
            return Err(Error::Validation(format!(
                "{} {}/{} can not be scaled down by {}",
                kind,
                namespace,
                name,
                format_quantity(-delta)
            )));
        }

        let target_nodes = if delta > 0 {
            self.target_nodes(namespace, pod_labels).await?
        } else {
            Vec::new()
        };

        debug!(
            %kind,
            namespace,
            name,
            delta_bytes = delta,
            nodes = ?target_nodes,
            "Resolved expansion request"
        );

        Ok(Resolution::Expansion(ExpansionRequest {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            requested_delta_bytes: delta,
            target_nodes,
        }))
    }

    /// Distinct, non-empty nodes of the pods matching `labels`
    async fn target_nodes(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeId>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let nodes: BTreeSet<NodeId> = self
            .store
            .list_pod_nodes(namespace, labels)
            .await?
            .into_iter()
            .filter(|n| !n.is_empty())
            .collect();
        Ok(nodes.into_iter().collect())
    }
}

/// Signed change from `current` to `requested` bytes.
///
/// Storage sizes are never negative; the subtraction of two valid sizes
/// cannot overflow.
fn storage_delta(
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    requested: i64,
    current: i64,
) -> Result<i64> {
    for (what, bytes) in [("requested", requested), ("current", current)] {
        if bytes < 0 {
            return Err(Error::Validation(format!(
                "{} {}/{} has a negative {} storage size {}",
                kind,
                namespace,
                name,
                what,
                format_quantity(bytes)
            )));
        }
    }
    requested.checked_sub(current).ok_or_else(|| {
        Error::Validation(format!(
            "{} {}/{} storage change is out of range",
            kind, namespace, name
        ))
    })
}
