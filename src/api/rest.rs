//! REST Handlers
//!
//! The webhook binary serves the AdmissionReview endpoint; the node agent
//! serves the on-demand reconcile trigger. Both serve health checks.

use crate::admission::{self, DecisionEngine};
use crate::reconciler::VolumeReconciler;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use kube::core::admission::AdmissionReview;
use kube::core::DynamicObject;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Path the API server calls for capacity admission
pub const VALIDATE_PATH: &str = "/validate-v1-sealos-pvc-check";

/// Path triggering a reconcile pass on the node agent
pub const RESTORE_PATH: &str = "/restore-pvc-size";

// =============================================================================
// REST Router
// =============================================================================

/// REST router builder
pub struct RestRouter {
    engine: Option<Arc<DecisionEngine>>,
    reconciler: Option<Arc<VolumeReconciler>>,
}

impl RestRouter {
    /// Routes of the admission webhook
    pub fn webhook(engine: Arc<DecisionEngine>) -> Self {
        Self {
            engine: Some(engine),
            reconciler: None,
        }
    }

    /// Routes of the node agent
    pub fn node_agent(reconciler: Arc<VolumeReconciler>) -> Self {
        Self {
            engine: None,
            reconciler: Some(reconciler),
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let mut router = Router::new()
            .route("/healthz", get(health_check))
            .route("/readyz", get(health_check));

        if let Some(engine) = self.engine {
            router = router.merge(
                Router::new()
                    .route(VALIDATE_PATH, post(validate))
                    .with_state(engine),
            );
        }
        if let Some(reconciler) = self.reconciler {
            router = router.merge(
                Router::new()
                    .route(RESTORE_PATH, get(restore_pvc_size).post(restore_pvc_size))
                    .with_state(reconciler),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Answer an AdmissionReview
async fn validate(
    State(engine): State<Arc<DecisionEngine>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    Json(admission::review(&engine, review).await)
}

/// Run one reconcile pass now
async fn restore_pvc_size(State(reconciler): State<Arc<VolumeReconciler>>) -> impl IntoResponse {
    match reconciler.run_pass().await {
        Ok(report) => {
            info!(resized = ?report.resized_names(), "On-demand reconcile pass finished");
            (
                StatusCode::OK,
                format!("Restored PVCs: {:?}", report.resized_names()),
            )
        }
        Err(e) => {
            error!(error = %e, "On-demand reconcile pass failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::EngineConfig;
    use crate::crd::cluster_pod_labels;
    use crate::reconciler::ReconcilerConfig;
    use crate::testing::{
        bound_claim, cluster, logical_volume, FakeObjectStore, FakeOracle, FakeVolumeBackend, GI,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn node_agent(backend: Arc<FakeVolumeBackend>) -> Router {
        let store = Arc::new(FakeObjectStore::default());
        store.add_claim(bound_claim("ns-a", "pvc-a", "node-1", 50 * GI));
        let reconciler = VolumeReconciler::new(
            store,
            backend,
            ReconcilerConfig {
                node_name: "node-1".into(),
                ..Default::default()
            },
        );
        RestRouter::node_agent(Arc::new(reconciler)).build()
    }

    #[tokio::test]
    async fn test_health() {
        let router = node_agent(Arc::new(FakeVolumeBackend::default()));
        let response = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_restore_pvc_size() {
        let backend = Arc::new(FakeVolumeBackend::with_volumes(vec![logical_volume(
            "pvc-a",
            40 * GI,
        )]));
        let router = node_agent(backend.clone());

        let response = router
            .clone()
            .oneshot(Request::get(RESTORE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"Restored PVCs: ["pvc-a"]"#);

        let response = router
            .oneshot(Request::post(RESTORE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "Restored PVCs: []");
    }

    #[tokio::test]
    async fn test_restore_pvc_size_failure() {
        let backend = Arc::new(FakeVolumeBackend::with_volumes(vec![logical_volume(
            "pvc-a",
            40 * GI,
        )]));
        backend.fail_resize_of("pvc-a");

        let response = node_agent(backend)
            .oneshot(Request::get(RESTORE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("insufficient free extents"));
    }

    #[tokio::test]
    async fn test_validate_endpoint() {
        let store = Arc::new(FakeObjectStore::default());
        store.add_pod("ns-a", cluster_pod_labels("my-db"), "node-1");
        let oracle = Arc::new(FakeOracle::with_free(&[("node-1", 20 * GI)]));
        let engine = Arc::new(DecisionEngine::new(store, oracle, EngineConfig::default()));
        let router = RestRouter::webhook(engine).build();

        let review = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "3f2a",
                "kind": {"group": "apps.kubeblocks.io", "version": "v1alpha1", "kind": "Cluster"},
                "resource": {
                    "group": "apps.kubeblocks.io",
                    "version": "v1alpha1",
                    "resource": "clusters"
                },
                "name": "my-db",
                "namespace": "ns-a",
                "operation": "UPDATE",
                "userInfo": {},
                "object": cluster("ns-a", "my-db", "35Gi"),
                "oldObject": cluster("ns-a", "my-db", "10Gi"),
                "dryRun": false
            }
        });

        let response = router
            .oneshot(
                Request::post(VALIDATE_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(review.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["response"]["uid"], "3f2a");
        assert_eq!(body["response"]["allowed"], false);
        assert!(body["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .contains("20Gi free < 25Gi requested delta"));
    }
}
