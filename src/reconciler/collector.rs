//! Node capacity collector
//!
//! Sums the local volume groups and publishes the totals as the
//! `lvm_vgs_total_capacity` / `lvm_vgs_total_free` gauges, labelled with
//! the node name. These gauges are what the Prometheus capacity oracle
//! queries.

use crate::domain::deadline::with_deadline;
use crate::domain::ports::{NodeId, VolumeBackendRef};
use crate::error::Result;
use crate::metrics::CapacityMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct NodeCapacityCollector {
    node: NodeId,
    backend: VolumeBackendRef,
    metrics: Arc<CapacityMetrics>,
    timeout: Duration,
}

impl NodeCapacityCollector {
    pub fn new(
        node: NodeId,
        backend: VolumeBackendRef,
        metrics: Arc<CapacityMetrics>,
        timeout: Duration,
    ) -> Self {
        Self {
            node,
            backend,
            metrics,
            timeout,
        }
    }

    /// Refresh the gauges once; returns (total, free) bytes
    pub async fn collect(&self) -> Result<(i64, i64)> {
        let groups = with_deadline(
            "list volume groups",
            self.timeout,
            self.backend.list_volume_groups(),
        )
        .await?;

        let (total, free) = groups
            .iter()
            .fold((0i64, 0i64), |(total, free), vg| {
                (total.saturating_add(vg.size_bytes), free.saturating_add(vg.free_bytes))
            });

        self.metrics.set_node_capacity(self.node.as_str(), total, free);
        debug!(
            node = %self.node,
            groups = groups.len(),
            total,
            free,
            "Updated volume group gauges"
        );
        Ok((total, free))
    }

    /// Collect every `interval` until `shutdown` fires
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(node = %self.node, interval_secs = interval.as_secs(), "Starting capacity collector");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        warn!(
                            node = %self.node,
                            error = %e,
                            "Failed to collect volume group capacity"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeVolumeBackend, GI};

    #[tokio::test]
    async fn test_sums_volume_groups() {
        let backend = Arc::new(FakeVolumeBackend::default());
        backend.add_group("lvmvg", 100 * GI, 40 * GI);
        backend.add_group("fastvg", 50 * GI, 10 * GI);
        let metrics = Arc::new(CapacityMetrics::new().unwrap());

        let collector = NodeCapacityCollector::new(
            NodeId::from("node-1"),
            backend,
            metrics.clone(),
            Duration::from_secs(5),
        );

        assert_eq!(collector.collect().await.unwrap(), (150 * GI, 50 * GI));
        assert_eq!(
            metrics.vg_total_free.with_label_values(&["node-1"]).get(),
            50 * GI
        );
        assert_eq!(
            metrics.vg_total_capacity.with_label_values(&["node-1"]).get(),
            150 * GI
        );
    }

    #[tokio::test]
    async fn test_no_volume_groups_reports_zero() {
        let metrics = Arc::new(CapacityMetrics::new().unwrap());
        let collector = NodeCapacityCollector::new(
            NodeId::from("node-1"),
            Arc::new(FakeVolumeBackend::default()),
            metrics,
            Duration::from_secs(5),
        );
        assert_eq!(collector.collect().await.unwrap(), (0, 0));
    }
}
