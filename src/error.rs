//! Error types for the LVM capacity guard
//!
//! Provides structured error types for the capacity oracle, the expansion
//! resolver, the admission engine and the volume reconciler. The admission
//! engine maps every error onto a [`DenialKind`] so callers can tell
//! "storage truly full" apart from "could not verify".

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the capacity guard
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Request Validation Errors
    // =========================================================================
    #[error("{0}")]
    Validation(String),

    #[error("{kind} {name} not found")]
    ResourceNotFound { kind: String, name: String },

    #[error("failed to decode {kind}: {reason}")]
    Decode { kind: String, reason: String },

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error(
        "pvc {namespace}/{name} can not be expanded: node {node} has {free} free < {requested} requested delta"
    )]
    ResourceShortage {
        namespace: String,
        name: String,
        node: String,
        free: String,
        requested: String,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Prometheus/Metrics Errors
    // =========================================================================
    #[error("Prometheus connection error: {0}")]
    PrometheusConnection(#[from] reqwest::Error),

    #[error("capacity query failed: {0}")]
    Query(String),

    #[error("Prometheus response parse error: {0}")]
    PrometheusResponseParse(String),

    #[error("no free capacity data reported for node {node}")]
    NoCapacityData { node: String },

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("namespace {namespace} is busy with another operation")]
    NamespaceBusy { namespace: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

/// Why an admission request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialKind {
    /// Malformed or logically invalid request
    Validation,
    /// A referenced cluster, component or template is absent
    NotFound,
    /// At least one target node lacks free capacity
    ResourceShortage,
    /// Capacity could not be verified
    Unverified,
}

impl std::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialKind::Validation => write!(f, "validation"),
            DenialKind::NotFound => write!(f, "not_found"),
            DenialKind::ResourceShortage => write!(f, "resource_shortage"),
            DenialKind::Unverified => write!(f, "unverified"),
        }
    }
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::PrometheusConnection(_)
            | Error::Kube(_)
            | Error::Query(_)
            | Error::Timeout { .. }
            | Error::BackendOperationFailed { .. } => ErrorAction::RequeueWithBackoff,

            // Another pass holds the namespace - short wait
            Error::NamespaceBusy { .. } => ErrorAction::RequeueAfter(Duration::from_secs(5)),

            // Metrics may show up once the node exporter scrapes
            Error::NoCapacityData { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Capacity may be freed later
            Error::ResourceShortage { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::ResourceNotFound { .. }
            | Error::Decode { .. }
            | Error::DurationParse(_)
            | Error::CapacityParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::PrometheusConnection(_)
                | Error::Kube(_)
                | Error::Query(_)
                | Error::Timeout { .. }
                | Error::NamespaceBusy { .. }
        )
    }

    /// Classify this error for an admission denial
    pub fn denial_kind(&self) -> DenialKind {
        match self {
            Error::ResourceShortage { .. } => DenialKind::ResourceShortage,
            Error::ResourceNotFound { .. } => DenialKind::NotFound,
            Error::Validation(_)
            | Error::Decode { .. }
            | Error::CapacityParse(_)
            | Error::JsonParse(_) => DenialKind::Validation,
            _ => DenialKind::Unverified,
        }
    }
}

/// Result type alias for the capacity guard
pub type Result<T> = std::result::Result<T, Error>;
