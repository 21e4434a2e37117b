//! Domain layer - Core types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod deadline;
pub mod ports;

pub use deadline::with_deadline;
pub use ports::*;
