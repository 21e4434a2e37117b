//! Fixed-value Capacity Oracle
//!
//! Offline operating mode for environments without the metrics backend:
//! every node reports the same configured free capacity.

use crate::domain::ports::{CapacityOracle, CapacityResult, NodeId};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Oracle answering a constant for every node
#[derive(Debug, Clone)]
pub struct FixedOracle {
    free_bytes: i64,
}

impl FixedOracle {
    pub fn new(free_bytes: i64) -> Result<Self> {
        if free_bytes < 0 {
            return Err(Error::Configuration(format!(
                "fixed free capacity must not be negative, got {}",
                free_bytes
            )));
        }
        Ok(Self { free_bytes })
    }
}

#[async_trait]
impl CapacityOracle for FixedOracle {
    async fn free_capacity(&self, node: &NodeId) -> Result<CapacityResult> {
        if node.is_empty() {
            return Err(Error::Query("node can not be empty".into()));
        }
        Ok(CapacityResult {
            node: node.clone(),
            free_bytes: self.free_bytes,
        })
    }

    fn mode(&self) -> &str {
        "fixed"
    }
}
