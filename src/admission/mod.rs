//! Admission
//!
//! - [`resolver`]: turns Cluster / OpsRequest / StatefulSet changes into an
//!   expansion request
//! - [`engine`]: checks the request against node free capacity
//! - [`webhook`]: AdmissionReview transport

pub mod engine;
pub mod resolver;
pub mod webhook;

pub use engine::*;
pub use resolver::*;
pub use webhook::{event_from_request, review};
