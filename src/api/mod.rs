//! API Module
//!
//! HTTP surface of both binaries: admission webhook, reconcile trigger and
//! health checks.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
