//! AdmissionReview adapter
//!
//! Converts `admission.k8s.io/v1` reviews into [`AdmissionEvent`]s and the
//! engine's verdict back into a review response.

use super::engine::{AdmissionEvent, DecisionEngine};
use crate::error::Result;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{info, warn};

/// Build the engine's view of an admission request
pub fn event_from_request(req: &AdmissionRequest<DynamicObject>) -> Result<AdmissionEvent> {
    let old_object = req.old_object.as_ref().map(serde_json::to_value).transpose()?;
    let new_object = req.object.as_ref().map(serde_json::to_value).transpose()?;

    Ok(AdmissionEvent {
        operation: req.operation.clone(),
        kind: req.kind.kind.clone(),
        namespace: req.namespace.clone().unwrap_or_default(),
        name: req.name.clone(),
        old_object,
        new_object,
    })
}

/// Answer one review
pub async fn review(
    engine: &DecisionEngine,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "Invalid admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };

    info!(
        group = %req.kind.group,
        version = %req.kind.version,
        resource = %req.resource.resource,
        kind = %req.kind.kind,
        namespace = req.namespace.as_deref().unwrap_or_default(),
        name = %req.name,
        operation = ?req.operation,
        "Admission request"
    );

    let response = AdmissionResponse::from(&req);
    let event = match event_from_request(&req) {
        Ok(event) => event,
        Err(e) => return response.deny(e.to_string()).into_review(),
    };

    let decision = engine.decide(&event).await;
    if decision.allowed {
        response.into_review()
    } else {
        response.deny(decision.reason).into_review()
    }
}
