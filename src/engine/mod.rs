mod conflict;
mod error;
mod mutations;
mod occupancy;
mod queries;
mod reconcile;

pub use conflict::{validate, Claims, Violation};
pub use error::LedgerError;
pub use occupancy::{pool_usage, snapshot, CapacityUsage, Claim, PoolUsage, ResourceSnapshot};
pub use reconcile::{reconcile_row, RowAction, SweepReport};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::ReadCache;
use crate::clock::Clock;
use crate::model::*;
use crate::pool::{Deployment, PoolSpec};
use crate::store::{RecordStore, UpdateOutcome};

const RESOURCES_KEY: &str = "resources";

fn records_key(pool: &PoolId) -> String {
    format!("records:{pool}")
}

/// The reservation ledger: one per process, shared by handle.
///
/// Reads go through the caches; every write path holds the pool's write lock
/// and invalidates the pool's cached records and the aggregate view before
/// returning.
pub struct Ledger {
    deployment: Deployment,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    cache_ttl: Ms,
    records: ReadCache<RecordSet>,
    resources: ReadCache<ResourceSnapshot>,
    write_locks: DashMap<PoolId, Arc<Mutex<()>>>,
}

impl Ledger {
    pub fn new(
        deployment: Deployment,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        cache_ttl: Ms,
    ) -> Self {
        let write_locks = deployment
            .ids()
            .map(|id| (id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            records: ReadCache::new("records", clock.clone()),
            resources: ReadCache::new("resources", clock.clone()),
            deployment,
            store,
            clock,
            cache_ttl,
            write_locks,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    pub(super) fn spec(&self, pool: &PoolId) -> Result<&PoolSpec, LedgerError> {
        self.deployment
            .pool(pool)
            .ok_or_else(|| LedgerError::UnknownPool(pool.clone()))
    }

    /// Exclusive write access to one pool.
    pub(super) async fn lock_pool(&self, pool: &PoolId) -> Result<tokio::sync::OwnedMutexGuard<()>, LedgerError> {
        let lock = self
            .write_locks
            .get(pool)
            .map(|e| e.value().clone())
            .ok_or_else(|| LedgerError::UnknownPool(pool.clone()))?;
        Ok(lock.lock_owned().await)
    }

    /// Drop cached state derived from `pool`.
    pub(super) fn invalidate(&self, pool: &PoolId) {
        self.records.invalidate(&records_key(pool));
        self.resources.invalidate(RESOURCES_KEY);
        debug!("invalidated cached state for pool {pool}");
    }

    /// Single-field write; misses become errors. Caller holds the pool lock.
    pub(super) async fn write_field(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        update: FieldUpdate,
    ) -> Result<(), LedgerError> {
        match self.store.update_field(pool, handle, update).await? {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::NotFound => Err(LedgerError::NotFound {
                pool: pool.clone(),
                index: handle.index,
            }),
            UpdateOutcome::Stale => Err(LedgerError::StaleHandle {
                pool: pool.clone(),
                index: handle.index,
            }),
        }
    }
}
