//! Node agent side
//!
//! - [`pass`]: grows logical volumes that lag behind their claims
//! - [`locks`]: per-namespace critical sections
//! - [`collector`]: publishes volume group capacity gauges

pub mod collector;
pub mod locks;
pub mod pass;

pub use collector::NodeCapacityCollector;
pub use locks::{LockMode, NamespaceGuard, NamespaceLocks};
pub use pass::*;
