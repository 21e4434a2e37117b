//! Custom Resource Definitions consumed by the capacity guard
//!
//! This module contains the KubeBlocks types whose updates can grow volumes:
//! - Cluster: database cluster with per-component volume claim templates
//! - OpsRequest: operation requests, including volume expansion

pub mod cluster;
pub mod decode;
pub mod ops_request;

pub use cluster::*;
pub use decode::*;
pub use ops_request::*;
