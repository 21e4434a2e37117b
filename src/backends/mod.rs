//! Adapters
//!
//! - [`lvm`]: volume backend driving the node's LVM tools
//! - [`kube_store`]: cluster object store over the Kubernetes API

pub mod kube_store;
pub mod lvm;

pub use kube_store::*;
pub use lvm::*;
