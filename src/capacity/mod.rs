//! Capacity Oracle
//!
//! Answers "how much free LVM capacity does this node have right now".
//! Two modes:
//! - Prometheus: live query against the node agents' published gauge
//! - Fixed: constant answer for offline/disabled environments

pub mod fixed;
pub mod promql;

pub use fixed::*;
pub use promql::*;

use crate::domain::ports::CapacityOracle;
use crate::error::Result;
use std::sync::Arc;

/// Oracle selection
#[derive(Debug, Clone)]
pub enum OracleConfig {
    Prometheus(PrometheusOracleConfig),
    Fixed { free_bytes: i64 },
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig::Prometheus(PrometheusOracleConfig::default())
    }
}

/// Factory for creating capacity oracles
pub struct OracleFactory;

impl OracleFactory {
    /// Create the oracle selected by `config`
    pub fn create(config: OracleConfig) -> Result<Arc<dyn CapacityOracle>> {
        match config {
            OracleConfig::Prometheus(config) => Ok(Arc::new(PrometheusOracle::new(config)?)),
            OracleConfig::Fixed { free_bytes } => Ok(Arc::new(FixedOracle::new(free_bytes)?)),
        }
    }
}
