//! Volume Reconciler
//!
//! Drives logical volume sizes on the local node toward the capacity their
//! bound claims already report. Only settled claims are considered (bound
//! here, requested == status), so an in-flight expansion is never raced.
//! Volumes only ever grow.

use super::locks::{LockMode, NamespaceLocks};
use crate::domain::deadline::with_deadline;
use crate::domain::ports::{
    ClusterObjectStoreRef, LogicalVolumeRecord, NodeId, VolumeBackendRef, VolumeClaimRecord,
};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::CapacityMetrics;
use crate::units::format_quantity;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operation name used for resize errors and deadlines
pub const RESIZE_OPERATION: &str = "resize";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Node this reconciler owns
    pub node_name: NodeId,
    /// Limit for each backend call
    pub backend_timeout: Duration,
    /// How resizes in the same namespace are serialized
    pub lock_mode: LockMode,
    /// Give up retrying a failed periodic pass after this long
    pub max_retry_elapsed: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            node_name: NodeId::default(),
            backend_timeout: Duration::from_secs(60),
            lock_mode: LockMode::Blocking,
            max_retry_elapsed: Duration::from_secs(120),
        }
    }
}

// =============================================================================
// Pass Report
// =============================================================================

/// One resize performed during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizedVolume {
    pub name: String,
    pub namespace: String,
    pub claim_name: String,
    pub from_bytes: i64,
    pub to_bytes: i64,
}

/// Outcome of a successful pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resized: Vec<ResizedVolume>,
}

impl ReconcileReport {
    pub fn resized_names(&self) -> Vec<String> {
        self.resized.iter().map(|r| r.name.clone()).collect()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct VolumeReconciler {
    store: ClusterObjectStoreRef,
    backend: VolumeBackendRef,
    locks: NamespaceLocks,
    metrics: Option<Arc<CapacityMetrics>>,
    last_report: RwLock<Option<ReconcileReport>>,
    config: ReconcilerConfig,
}

impl VolumeReconciler {
    pub fn new(
        store: ClusterObjectStoreRef,
        backend: VolumeBackendRef,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            backend,
            locks: NamespaceLocks::new(config.lock_mode),
            metrics: None,
            last_report: RwLock::new(None),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CapacityMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn locks(&self) -> &NamespaceLocks {
        &self.locks
    }

    /// Report of the last successful pass
    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report.read().clone()
    }

    /// Run one reconciliation pass.
    ///
    /// The first failing claim aborts the pass; volumes resized before it
    /// stay resized.
    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let result = self.reconcile_volumes().await;
        self.locks.sweep_idle();

        let resized = match result {
            Ok(resized) => resized,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_pass("error", 0);
                }
                return Err(e);
            }
        };

        let report = ReconcileReport {
            started_at,
            finished_at: Utc::now(),
            resized,
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_pass("success", report.resized.len());
        }
        *self.last_report.write() = Some(report.clone());

        Ok(report)
    }

    async fn reconcile_volumes(&self) -> Result<Vec<ResizedVolume>> {
        let node = &self.config.node_name;
        let timeout = self.config.backend_timeout;

        let claims =
            with_deadline("list volume claims", timeout, self.store.list_volume_claims()).await?;
        let settled: HashMap<&str, &VolumeClaimRecord> = claims
            .iter()
            .filter(|c| c.is_settled_on(node))
            .map(|c| (c.volume_name.as_str(), c))
            .collect();
        if settled.is_empty() {
            debug!(node = %node, "No settled claims on node");
            return Ok(Vec::new());
        }

        let volumes = with_deadline(
            "list logical volumes",
            timeout,
            self.backend.list_logical_volumes(),
        )
        .await?;

        let mut done: HashSet<String> = HashSet::new();
        let mut resized = Vec::new();

        for volume in volumes.iter().filter(|v| v.size_bytes > 0) {
            let claim = match settled.get(volume.name.as_str()) {
                Some(claim) => *claim,
                None => continue,
            };
            if volume.size_bytes >= claim.status_capacity_bytes || done.contains(&volume.name) {
                continue;
            }

            if let Some(record) = self.resize(volume, claim).await? {
                resized.push(record);
            }
            done.insert(volume.name.clone());
        }

        Ok(resized)
    }

    /// Grow `volume` to the claim's capacity inside the namespace's
    /// critical section. The size is read again under the lock; a
    /// concurrent pass may already have grown it.
    async fn resize(
        &self,
        volume: &LogicalVolumeRecord,
        claim: &VolumeClaimRecord,
    ) -> Result<Option<ResizedVolume>> {
        let timeout = self.config.backend_timeout;
        let target = claim.status_capacity_bytes;
        let _guard = self.locks.acquire(&claim.namespace).await?;

        let current = with_deadline(
            "list logical volumes",
            timeout,
            self.backend.list_logical_volumes(),
        )
        .await?
        .into_iter()
        .find(|v| v.name == volume.name)
        .map(|v| v.size_bytes)
        .unwrap_or(volume.size_bytes);
        if current >= target {
            debug!(volume = %volume.name, "Volume already grown");
            return Ok(None);
        }

        info!(
            volume = %volume.name,
            namespace = %claim.namespace,
            claim = %claim.claim_name,
            from = %format_quantity(current),
            to = %format_quantity(target),
            backend = self.backend.backend_name(),
            "Resizing logical volume"
        );

        with_deadline(
            format!("{} of {}", RESIZE_OPERATION, volume.name),
            timeout,
            self.backend.resize_volume(volume, target),
        )
        .await?;

        Ok(Some(ResizedVolume {
            name: volume.name.clone(),
            namespace: claim.namespace.clone(),
            claim_name: claim.claim_name.clone(),
            from_bytes: current,
            to_bytes: target,
        }))
    }

    /// Run a pass, retrying failures the way their [`ErrorAction`] asks
    pub async fn run_pass_with_retry(&self) -> Result<ReconcileReport> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_elapsed),
            ..Default::default()
        };

        backoff::future::retry(policy, || async { self.run_pass().await.map_err(retry_error) })
            .await
    }

    /// Run passes every `interval` until `shutdown` fires
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(
            node = %self.config.node_name,
            interval_secs = interval.as_secs(),
            "Starting volume reconciler"
        );
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Volume reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.run_pass_with_retry().await {
                        Ok(report) if !report.resized.is_empty() => {
                            info!(resized = ?report.resized_names(), "Reconcile pass finished");
                        }
                        Ok(_) => debug!("Reconcile pass finished, nothing to resize"),
                        Err(e) => error!(error = %e, "Reconcile pass failed"),
                    }
                }
            }
        }
    }
}

fn retry_error(e: Error) -> backoff::Error<Error> {
    match e.action() {
        ErrorAction::RequeueWithBackoff => {
            warn!(error = %e, "Reconcile pass failed, retrying");
            backoff::Error::transient(e)
        }
        ErrorAction::RequeueAfter(after) => {
            warn!(
                error = %e,
                retry_after_secs = after.as_secs(),
                "Reconcile pass failed, retrying"
            );
            backoff::Error::retry_after(e, after)
        }
        ErrorAction::NoRequeue => backoff::Error::permanent(e),
    }
}
