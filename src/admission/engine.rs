//! Admission Decision Engine
//!
//! Evaluates one admission event: resolve the expansion it carries, ask the
//! capacity oracle about every target node, allow or deny. The engine fails
//! closed: when capacity cannot be verified the request is denied and marked
//! retriable. Nothing in the cluster is mutated.

use super::resolver::{ExpansionResolver, ExpansionSource, Resolution, ShrinkPolicy};
use crate::crd::{decode_object, Cluster, OpsRequest};
use crate::domain::deadline::with_deadline;
use crate::domain::ports::{
    CapacityOracleRef, ClusterObjectStoreRef, ExpansionRequest, ResourceKind,
};
use crate::error::{DenialKind, Error, Result};
use crate::metrics::CapacityMetrics;
use crate::reconciler::locks::{LockMode, NamespaceLocks};
use crate::units::format_quantity;
use futures::future::join_all;
use k8s_openapi::api::apps::v1::StatefulSet;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use kube::core::admission::Operation;

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limit for each per-node capacity query
    pub query_timeout: Duration,
    /// Shrink handling per kind
    pub shrink: ShrinkPolicy,
    /// Serialize evaluations per namespace; `None` disables
    pub lock_mode: Option<LockMode>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            shrink: ShrinkPolicy::default(),
            lock_mode: None,
        }
    }
}

// =============================================================================
// Events and Decisions
// =============================================================================

/// Transport-neutral admission event
#[derive(Debug, Clone)]
pub struct AdmissionEvent {
    pub operation: Operation,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub old_object: Option<serde_json::Value>,
    pub new_object: Option<serde_json::Value>,
}

/// Engine verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: String,
    /// Denied only because capacity could not be verified right now
    pub retriable: bool,
    pub denial: Option<DenialKind>,
}

impl AdmissionDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            retriable: false,
            denial: None,
        }
    }

    pub fn deny(reason: impl Into<String>, denial: DenialKind, retriable: bool) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            retriable,
            denial: Some(denial),
        }
    }

    /// Outcome label for metrics and logs
    pub fn outcome(&self) -> String {
        match self.denial {
            None => "allowed".to_string(),
            Some(kind) => kind.to_string(),
        }
    }
}

// =============================================================================
// Decision Engine
// =============================================================================

pub struct DecisionEngine {
    resolver: ExpansionResolver,
    oracle: CapacityOracleRef,
    locks: Option<NamespaceLocks>,
    metrics: Option<Arc<CapacityMetrics>>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        store: ClusterObjectStoreRef,
        oracle: CapacityOracleRef,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver: ExpansionResolver::new(store, config.shrink),
            oracle,
            locks: config.lock_mode.map(NamespaceLocks::new),
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CapacityMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Decide one admission event
    pub async fn decide(&self, event: &AdmissionEvent) -> AdmissionDecision {
        let decision = match self.evaluate(event).await {
            Ok(decision) => decision,
            Err(err) => self.denial_for(event, &err),
        };

        if decision.allowed {
            debug!(
                kind = %event.kind,
                namespace = %event.namespace,
                name = %event.name,
                reason = %decision.reason,
                "Admission allowed"
            );
        } else {
            info!(
                kind = %event.kind,
                namespace = %event.namespace,
                name = %event.name,
                outcome = %decision.outcome(),
                retriable = decision.retriable,
                reason = %decision.reason,
                "Admission denied"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(&event.kind, &decision.outcome());
        }

        decision
    }

    async fn evaluate(&self, event: &AdmissionEvent) -> Result<AdmissionDecision> {
        let kind = match ResourceKind::from_kind(&event.kind) {
            Some(kind) => kind,
            None => {
                return Ok(AdmissionDecision::allow(format!(
                    "kind {} is not guarded",
                    event.kind
                )))
            }
        };
        match &event.operation {
            Operation::Update => {}
            Operation::Create if kind == ResourceKind::OpsRequest => {}
            op => {
                return Ok(AdmissionDecision::allow(format!(
                    "{:?} of {} carries no storage change",
                    op, kind
                )))
            }
        }

        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&event.namespace).await?),
            None => None,
        };

        let source = source_from_event(kind, event)?;
        match self
            .resolver
            .resolve(&event.namespace, &event.name, &source)
            .await?
        {
            Resolution::Skip(reason) => Ok(AdmissionDecision::allow(reason)),
            Resolution::Expansion(request) => self.check_capacity(&request).await,
        }
    }

    /// Compare the delta against every target node's free capacity.
    ///
    /// A shortage on any node wins over lookup failures on others.
    async fn check_capacity(&self, request: &ExpansionRequest) -> Result<AdmissionDecision> {
        if request.requested_delta_bytes <= 0 {
            return Ok(AdmissionDecision::allow("no storage growth requested"));
        }
        if request.target_nodes.is_empty() {
            return Ok(AdmissionDecision::allow("no scheduled pods to check"));
        }

        let lookups = request.target_nodes.iter().map(|node| {
            with_deadline(
                format!("capacity query for node {}", node),
                self.config.query_timeout,
                self.oracle.free_capacity(node),
            )
        });
        let results = join_all(lookups).await;

        let mut lookup_error = None;
        for result in results {
            match result {
                Ok(capacity) if capacity.free_bytes < request.requested_delta_bytes => {
                    return Err(Error::ResourceShortage {
                        namespace: request.namespace.clone(),
                        name: request.name.clone(),
                        node: capacity.node.to_string(),
                        free: format_quantity(capacity.free_bytes),
                        requested: format_quantity(request.requested_delta_bytes),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        namespace = %request.namespace,
                        name = %request.name,
                        oracle = self.oracle.mode(),
                        error = %err,
                        "Capacity lookup failed"
                    );
                    lookup_error.get_or_insert(err);
                }
            }
        }

        match lookup_error {
            Some(err) => Err(err),
            None => Ok(AdmissionDecision::allow(format!(
                "{} free on {} node(s)",
                format_quantity(request.requested_delta_bytes),
                request.target_nodes.len()
            ))),
        }
    }

    fn denial_for(&self, event: &AdmissionEvent, err: &Error) -> AdmissionDecision {
        let denial = err.denial_kind();
        let message = err.to_string();
        let subject = format!("{}/{}", event.namespace, event.name);

        let reason = match denial {
            DenialKind::ResourceShortage => message,
            DenialKind::Unverified => format!(
                "could not verify free capacity for {} {}: {}",
                event.kind, subject, message
            ),
            _ if message.contains(&subject) => message,
            _ => format!("{} {}: {}", event.kind, subject, message),
        };
        let retriable = denial == DenialKind::Unverified && err.is_transient();

        AdmissionDecision::deny(reason, denial, retriable)
    }
}

fn source_from_event(kind: ResourceKind, event: &AdmissionEvent) -> Result<ExpansionSource> {
    let kind_name = kind.to_string();
    match kind {
        ResourceKind::Cluster => {
            let new: Cluster = decode_required(&kind_name, event.new_object.as_ref(), "object")?;
            let old: Cluster = decode_required(&kind_name, event.old_object.as_ref(), "oldObject")?;
            Ok(ExpansionSource::ClusterSpec {
                old: Box::new(old),
                new: Box::new(new),
            })
        }
        ResourceKind::OpsRequest => {
            let ops: OpsRequest = decode_required(&kind_name, event.new_object.as_ref(), "object")?;
            Ok(ExpansionSource::OpsRequest(Box::new(ops)))
        }
        ResourceKind::StatefulSet => {
            let sts: StatefulSet =
                decode_required(&kind_name, event.new_object.as_ref(), "object")?;
            Ok(ExpansionSource::Workload(Box::new(sts)))
        }
    }
}

fn decode_required<T: DeserializeOwned>(
    kind: &str,
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T> {
    match value {
        Some(value) => decode_object(kind, value),
        None => Err(Error::Decode {
            kind: kind.to_string(),
            reason: format!("request carries no {}", field),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::cluster_pod_labels;
    use crate::testing::{
        cluster, ops_request, stateful_set, FakeAnswer, FakeObjectStore, FakeOracle, GI,
    };
    use std::collections::BTreeMap;

    fn engine(store: Arc<FakeObjectStore>, oracle: Arc<FakeOracle>) -> DecisionEngine {
        DecisionEngine::new(store, oracle, EngineConfig::default())
    }

    fn db_store(nodes: &[&str]) -> Arc<FakeObjectStore> {
        let store = Arc::new(FakeObjectStore::default());
        for node in nodes {
            store.add_pod("ns-a", cluster_pod_labels("my-db"), node);
        }
        store
    }

    fn cluster_update(old: &str, new: &str) -> AdmissionEvent {
        AdmissionEvent {
            operation: Operation::Update,
            kind: "Cluster".into(),
            namespace: "ns-a".into(),
            name: "my-db".into(),
            old_object: Some(serde_json::to_value(cluster("ns-a", "my-db", old)).unwrap()),
            new_object: Some(serde_json::to_value(cluster("ns-a", "my-db", new)).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_growth_within_free_capacity_is_allowed() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = engine(db_store(&["node-1"]), oracle.clone());

        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert!(decision.allowed, "{}", decision.reason);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_growth_beyond_free_capacity_is_denied() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = engine(db_store(&["node-1"]), oracle);

        let decision = engine.decide(&cluster_update("10Gi", "35Gi")).await;
        assert!(!decision.allowed);
        assert!(!decision.retriable);
        assert_eq!(decision.denial, Some(DenialKind::ResourceShortage));
        assert_eq!(
            decision.reason,
            "pvc ns-a/my-db can not be expanded: node node-1 has 20Gi free < 25Gi requested delta"
        );
    }

    #[tokio::test]
    async fn test_growth_equal_to_free_capacity_is_allowed() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = engine(db_store(&["node-1"]), oracle);

        let decision = engine.decide(&cluster_update("10Gi", "30Gi")).await;
        assert!(decision.allowed, "{}", decision.reason);
    }

    #[tokio::test]
    async fn test_shrink_denied_without_oracle_call() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = engine(db_store(&["node-1"]), oracle.clone());

        let decision = engine.decide(&cluster_update("10Gi", "5Gi")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.denial, Some(DenialKind::Validation));
        assert!(decision.reason.contains("can not be scaled down"));
        assert!(decision.reason.contains("ns-a/my-db"));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_positive_delta_skips_oracle() {
        let oracle = Arc::new(FakeOracle::default());
        let store = Arc::new(FakeObjectStore::default());
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        store.add_pod("ns-a", labels.clone(), "node-1");
        let engine = engine(store, oracle.clone());

        for annotation in ["10Gi", "8Gi"] {
            let sts = stateful_set("ns-a", "web", labels.clone(), "10Gi", Some(annotation));
            let event = AdmissionEvent {
                operation: Operation::Update,
                kind: "StatefulSet".into(),
                namespace: "ns-a".into(),
                name: "web".into(),
                old_object: None,
                new_object: Some(serde_json::to_value(sts).unwrap()),
            };
            assert!(engine.decide(&event).await.allowed);
        }
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_ops_request_with_missing_component_is_denied() {
        let store = db_store(&["node-1"]);
        store.add_cluster(cluster("ns-a", "my-db", "10Gi"));
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 100 * GI)]));
        let engine = engine(store, oracle.clone());

        let ops = ops_request("ns-a", "expand-1", "my-db", "postgres", "data", "20Gi");
        let event = AdmissionEvent {
            operation: Operation::Create,
            kind: "OpsRequest".into(),
            namespace: "ns-a".into(),
            name: "expand-1".into(),
            old_object: None,
            new_object: Some(serde_json::to_value(ops).unwrap()),
        };

        let decision = engine.decide(&event).await;
        assert!(!decision.allowed);
        assert!(!decision.retriable);
        assert_eq!(decision.denial, Some(DenialKind::NotFound));
        assert!(decision.reason.contains("postgres"));
        assert!(decision.reason.contains("ns-a/expand-1"));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_ops_request_create_checks_capacity() {
        let store = db_store(&["node-1", "node-2"]);
        store.add_cluster(cluster("ns-a", "my-db", "10Gi"));
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 50 * GI), ("node-2", 5 * GI)]));
        let engine = engine(store, oracle.clone());

        let ops = ops_request("ns-a", "expand-1", "my-db", "mysql", "data", "20Gi");
        let event = AdmissionEvent {
            operation: Operation::Create,
            kind: "OpsRequest".into(),
            namespace: "ns-a".into(),
            name: "expand-1".into(),
            old_object: None,
            new_object: Some(serde_json::to_value(ops).unwrap()),
        };

        let decision = engine.decide(&event).await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("node node-2 has 5Gi free < 10Gi"));
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_oracle_fails_closed_and_retriable() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("node-1", FakeAnswer::Unreachable);
        let engine = engine(db_store(&["node-1"]), oracle);

        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert!(!decision.allowed);
        assert!(decision.retriable);
        assert_eq!(decision.denial, Some(DenialKind::Unverified));
        assert!(decision.reason.starts_with("could not verify free capacity"));
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_retriable() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("node-1", FakeAnswer::NoData);
        let engine = engine(db_store(&["node-1"]), oracle);

        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert!(!decision.allowed);
        assert!(!decision.retriable);
        assert_eq!(decision.denial, Some(DenialKind::Unverified));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_oracle_times_out() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("node-1", FakeAnswer::Hang);
        let config = EngineConfig {
            query_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let engine = DecisionEngine::new(db_store(&["node-1"]), oracle, config);

        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert!(!decision.allowed);
        assert!(decision.retriable);
        assert!(decision.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_shortage_reported_over_lookup_failure() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("node-1", FakeAnswer::Unreachable);
        oracle.set("node-2", FakeAnswer::Free(GI));
        let engine = engine(db_store(&["node-1", "node-2"]), oracle);

        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert_eq!(decision.denial, Some(DenialKind::ResourceShortage));
        assert!(decision.reason.contains("node-2"));
    }

    #[tokio::test]
    async fn test_unguarded_events_are_allowed() {
        let oracle = Arc::new(FakeOracle::default());
        let engine = engine(db_store(&["node-1"]), oracle.clone());

        let mut delete = cluster_update("10Gi", "500Gi");
        delete.operation = Operation::Delete;
        assert!(engine.decide(&delete).await.allowed);

        let mut create = cluster_update("10Gi", "500Gi");
        create.operation = Operation::Create;
        create.old_object = None;
        assert!(engine.decide(&create).await.allowed);

        let mut deployment = cluster_update("10Gi", "500Gi");
        deployment.kind = "Deployment".into();
        assert!(engine.decide(&deployment).await.allowed);

        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_object_is_denied() {
        let engine = engine(db_store(&["node-1"]), Arc::new(FakeOracle::default()));

        let mut event = cluster_update("10Gi", "15Gi");
        event.new_object = Some(serde_json::json!({"spec": {"componentSpecs": "nope"}}));

        let decision = engine.decide(&event).await;
        assert!(!decision.allowed);
        assert_eq!(decision.denial, Some(DenialKind::Validation));
        assert!(decision.reason.starts_with("Cluster ns-a/my-db: failed to decode Cluster"));
    }

    #[tokio::test]
    async fn test_reject_lock_mode_denies_concurrent_namespace() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let config = EngineConfig {
            lock_mode: Some(LockMode::Reject),
            ..Default::default()
        };
        let engine = DecisionEngine::new(db_store(&["node-1"]), oracle, config);

        let held = engine
            .locks
            .as_ref()
            .unwrap()
            .acquire("ns-a")
            .await
            .unwrap();
        let decision = engine.decide(&cluster_update("10Gi", "15Gi")).await;
        assert!(!decision.allowed);
        assert!(decision.retriable);

        drop(held);
        assert!(engine.decide(&cluster_update("10Gi", "15Gi")).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_lock_mode_waits_for_namespace() {
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let config = EngineConfig {
            lock_mode: Some(LockMode::Blocking),
            ..Default::default()
        };
        let engine = Arc::new(DecisionEngine::new(
            db_store(&["node-1"]),
            oracle.clone(),
            config,
        ));

        let held = engine
            .locks
            .as_ref()
            .unwrap()
            .acquire("ns-a")
            .await
            .unwrap();
        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.decide(&cluster_update("10Gi", "15Gi")).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(oracle.calls(), 0);

        drop(held);
        let decision = pending.await.unwrap();
        assert!(decision.allowed);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_decisions_are_counted() {
        let metrics = Arc::new(CapacityMetrics::new().unwrap());
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = engine(db_store(&["node-1"]), oracle).with_metrics(metrics.clone());

        engine.decide(&cluster_update("10Gi", "15Gi")).await;
        engine.decide(&cluster_update("10Gi", "50Gi")).await;

        let counter = &metrics.admission_decisions;
        assert_eq!(counter.with_label_values(&["Cluster", "allowed"]).get(), 1);
        assert_eq!(
            counter
                .with_label_values(&["Cluster", "resource_shortage"])
                .get(),
            1
        );
    }
}
