//! Per-namespace serialization
//!
//! At most one resize (or, when the admission engine is configured to, one
//! admission evaluation) runs per namespace at a time. Locks are created on
//! first use and evicted by [`NamespaceLocks::sweep_idle`] once nobody holds
//! or waits on them.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Behaviour when a namespace is already held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Wait for the holder to finish
    Blocking,
    /// Fail immediately with [`Error::NamespaceBusy`]
    Reject,
}

impl std::str::FromStr for LockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(LockMode::Blocking),
            "reject" => Ok(LockMode::Reject),
            other => Err(Error::Configuration(format!("unknown lock mode: {}", other))),
        }
    }
}

/// Held while a namespace's critical section runs
pub type NamespaceGuard = OwnedMutexGuard<()>;

/// Lazily created async mutex per namespace
pub struct NamespaceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    mode: LockMode,
}

impl NamespaceLocks {
    pub fn new(mode: LockMode) -> Self {
        Self {
            locks: DashMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Enter the critical section for `namespace`
    pub async fn acquire(&self, namespace: &str) -> Result<NamespaceGuard> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self
            .locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match self.mode {
            LockMode::Blocking => Ok(lock.lock_owned().await),
            LockMode::Reject => lock.try_lock_owned().map_err(|_| {
                debug!(namespace, "Namespace lock already held");
                Error::NamespaceBusy {
                    namespace: namespace.to_string(),
                }
            }),
        }
    }

    /// Drop locks nobody holds or waits on; returns how many were evicted
    pub fn sweep_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
