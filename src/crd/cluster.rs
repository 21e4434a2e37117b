//! KubeBlocks Cluster CRD
//!
//! Only the parts of `apps.kubeblocks.io/v1alpha1 Cluster` that carry
//! storage requests are modelled; unknown fields are ignored on decode.

use crate::error::{Error, Result};
use crate::units::{parse_quantity, STORAGE_RESOURCE};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carrying the owning cluster name on KubeBlocks pods
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Label identifying KubeBlocks-managed pods
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] for KubeBlocks
pub const MANAGED_BY_KUBEBLOCKS: &str = "kubeblocks";

// =============================================================================
// Cluster CRD
// =============================================================================

/// A database cluster managed by KubeBlocks.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apps.kubeblocks.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Name of the cluster definition this cluster instantiates
    #[serde(default)]
    pub cluster_definition_ref: Option<String>,

    /// Components making up the cluster
    #[serde(default)]
    pub component_specs: Vec<ClusterComponentSpec>,
}

/// One component (e.g. "mysql", "redis") of a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterComponentSpec {
    pub name: String,

    #[serde(default)]
    pub component_def_ref: Option<String>,

    #[serde(default)]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
}

/// Named volume claim template of a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplate {
    pub name: String,

    #[serde(default)]
    pub spec: VolumeClaimTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplateSpec {
    #[serde(default)]
    pub access_modes: Vec<String>,

    #[serde(default)]
    pub storage_class_name: Option<String>,

    #[serde(default)]
    pub resources: ResourceRequests,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRequests {
    /// Quantities keyed by resource name, e.g. `storage: 10Gi`
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

impl VolumeClaimTemplate {
    /// Build a template requesting `storage` (a quantity string)
    pub fn with_storage(name: impl Into<String>, storage: impl Into<String>) -> Self {
        let mut requests = BTreeMap::new();
        requests.insert(STORAGE_RESOURCE.to_string(), storage.into());
        Self {
            name: name.into(),
            spec: VolumeClaimTemplateSpec {
                resources: ResourceRequests { requests },
                ..Default::default()
            },
        }
    }

    /// Requested storage in bytes; an absent request counts as zero
    pub fn storage_bytes(&self) -> Result<i64> {
        match self.spec.resources.requests.get(STORAGE_RESOURCE) {
            Some(q) => parse_quantity(q).map_err(|e| {
                Error::Validation(format!(
                    "volume claim template {} has an invalid storage request: {}",
                    self.name, e
                ))
            }),
            None => Ok(0),
        }
    }
}

impl ClusterSpec {
    /// First component's first volume claim template
    pub fn primary_template(&self) -> Option<&VolumeClaimTemplate> {
        self.component_specs
            .first()
            .and_then(|c| c.volume_claim_templates.first())
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&ClusterComponentSpec> {
        self.component_specs.iter().find(|c| c.name == name)
    }
}

impl ClusterComponentSpec {
    pub fn template(&self, name: &str) -> Option<&VolumeClaimTemplate> {
        self.volume_claim_templates.iter().find(|t| t.name == name)
    }
}

/// Pod labels selecting the members of a KubeBlocks cluster
pub fn cluster_pod_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), cluster_name.to_string());
    labels.insert(
        MANAGED_BY_LABEL.to_string(),
        MANAGED_BY_KUBEBLOCKS.to_string(),
    );
    labels
}
