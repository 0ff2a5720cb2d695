//! Per-(tenant, part) exclusive lock table.
//!
//! A fixed array of mutex shards addressed by a hash of the tenant and part
//! ids. Two parts may share a shard; that only costs throughput, never
//! correctness. Acquisition is bounded by a timeout so a stuck writer surfaces
//! as a transient error instead of a hang.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use factory_core::{PartId, TenantId};

use crate::store::StoreError;

#[derive(Debug)]
pub struct PartLockTable {
    shards: Box<[Mutex<()>]>,
    timeout: Duration,
}

/// Held lock on one shard. Released on drop.
#[derive(Debug)]
pub struct PartLockGuard<'a> {
    shard: usize,
    _guard: MutexGuard<'a, ()>,
}

impl PartLockGuard<'_> {
    pub fn shard(&self) -> usize {
        self.shard
    }
}

impl PartLockTable {
    /// `shards` is clamped to at least one.
    pub fn new(shards: usize, timeout: Duration) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards, timeout }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, tenant_id: TenantId, part_id: PartId) -> usize {
        let mut hasher = DefaultHasher::new();
        (tenant_id, part_id).hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Block until the part's shard is free or the timeout elapses.
    pub fn lock(&self, tenant_id: TenantId, part_id: PartId) -> Result<PartLockGuard<'_>, StoreError> {
        let shard = self.shard_for(tenant_id, part_id);
        match self.shards[shard].try_lock_for(self.timeout) {
            Some(guard) => {
                tracing::debug!(%tenant_id, %part_id, shard, "part lock acquired");
                Ok(PartLockGuard { shard, _guard: guard })
            }
            None => Err(StoreError::LockTimeout {
                tenant_id,
                part_id,
                waited_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
