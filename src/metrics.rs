//! Prometheus metrics
//!
//! One owned [`Registry`] per process. The node agent publishes the volume
//! group gauges that the Prometheus capacity oracle later queries; both
//! binaries count their decisions and passes.

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Gauge name holding the total size of a node's volume groups
pub const VG_TOTAL_CAPACITY: &str = "lvm_vgs_total_capacity";

/// Gauge name holding the free space of a node's volume groups
pub const VG_TOTAL_FREE: &str = "lvm_vgs_total_free";

/// Capacity guard metrics
pub struct CapacityMetrics {
    registry: Registry,
    pub vg_total_capacity: IntGaugeVec,
    pub vg_total_free: IntGaugeVec,
    pub admission_decisions: IntCounterVec,
    pub reconcile_passes: IntCounterVec,
    pub volumes_resized: IntCounter,
}

impl CapacityMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let vg_total_capacity = IntGaugeVec::new(
            Opts::new(
                VG_TOTAL_CAPACITY,
                "Total size of all LVM volume groups on the node in bytes",
            ),
            &["node"],
        )?;
        let vg_total_free = IntGaugeVec::new(
            Opts::new(VG_TOTAL_FREE, "Free space of all LVM volume groups on the node in bytes"),
            &["node"],
        )?;
        let admission_decisions = IntCounterVec::new(
            Opts::new(
                "capacity_guard_admission_decisions_total",
                "Admission decisions by resource kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let reconcile_passes = IntCounterVec::new(
            Opts::new(
                "capacity_guard_reconcile_passes_total",
                "Volume reconcile passes by result",
            ),
            &["result"],
        )?;
        let volumes_resized = IntCounter::new(
            "capacity_guard_volumes_resized_total",
            "Logical volumes grown to match their claim",
        )?;

        registry.register(Box::new(vg_total_capacity.clone()))?;
        registry.register(Box::new(vg_total_free.clone()))?;
        registry.register(Box::new(admission_decisions.clone()))?;
        registry.register(Box::new(reconcile_passes.clone()))?;
        registry.register(Box::new(volumes_resized.clone()))?;

        Ok(Self {
            registry,
            vg_total_capacity,
            vg_total_free,
            admission_decisions,
            reconcile_passes,
            volumes_resized,
        })
    }

    pub fn record_decision(&self, kind: &str, outcome: &str) {
        self.admission_decisions
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn record_pass(&self, result: &str, resized: usize) {
        self.reconcile_passes.with_label_values(&[result]).inc();
        self.volumes_resized.inc_by(resized as u64);
    }

    pub fn set_node_capacity(&self, node: &str, total_bytes: i64, free_bytes: i64) {
        self.vg_total_capacity
            .with_label_values(&[node])
            .set(total_bytes);
        self.vg_total_free.with_label_values(&[node]).set(free_bytes);
    }

    /// Text exposition of everything registered
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
