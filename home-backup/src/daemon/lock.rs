//! Process-wide exclusivity between backup and restore.

use crate::utils::{BackupError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct OperationLock {
    busy: AtomicBool,
}

impl OperationLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the lock for `operation`, failing with [`BackupError::Busy`]
    /// while another operation holds it.
    pub fn try_acquire(self: &Arc<Self>, operation: &str) -> Result<OperationGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BackupError::Busy)?;
        debug!("{} acquired the operation lock", operation);
        Ok(OperationGuard {
            lock: self.clone(),
            operation: operation.to_string(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct OperationGuard {
    lock: Arc<OperationLock>,
    operation: String,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
        debug!("{} released the operation lock", self.operation);
    }
}
