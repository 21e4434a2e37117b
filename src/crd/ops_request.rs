//! KubeBlocks OpsRequest CRD
//!
//! An OpsRequest asks KubeBlocks to perform an operation against a Cluster.
//! Only `VolumeExpansion` requests matter for capacity checks.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An operation against a KubeBlocks cluster.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apps.kubeblocks.io",
    version = "v1alpha1",
    kind = "OpsRequest",
    plural = "opsrequests",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OpsRequestSpec {
    /// Name of the cluster the operation targets
    pub cluster_ref: String,

    /// Operation type
    #[serde(rename = "type")]
    pub ops_type: OpsType,

    /// Per-component volume expansion targets
    #[serde(default)]
    pub volume_expansion: Option<Vec<VolumeExpansion>>,
}

/// OpsRequest operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OpsType {
    VolumeExpansion,
    HorizontalScaling,
    VerticalScaling,
    Restart,
    Upgrade,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for OpsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpsType::VolumeExpansion => write!(f, "VolumeExpansion"),
            OpsType::HorizontalScaling => write!(f, "HorizontalScaling"),
            OpsType::VerticalScaling => write!(f, "VerticalScaling"),
            OpsType::Restart => write!(f, "Restart"),
            OpsType::Upgrade => write!(f, "Upgrade"),
            OpsType::Other => write!(f, "Other"),
        }
    }
}

/// Volume expansion for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeExpansion {
    pub component_name: String,

    #[serde(default)]
    pub volume_claim_templates: Vec<OpsVolumeClaimTemplate>,
}

/// Target size of one named volume claim template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OpsVolumeClaimTemplate {
    pub name: String,
    /// Requested storage quantity, e.g. "20Gi"
    pub storage: String,
}

impl OpsRequestSpec {
    /// First expansion entry and its first template, if any
    pub fn first_expansion(&self) -> Option<(&VolumeExpansion, &OpsVolumeClaimTemplate)> {
        let expansion = self.volume_expansion.as_ref()?.first()?;
        let template = expansion.volume_claim_templates.first()?;
        Some((expansion, template))
    }
}
