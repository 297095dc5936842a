use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::Corrupt(msg) => write!(f, "store corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Corrupt(_) => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Result of a positional update. Neither miss is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Index past the end of the pool.
    NotFound,
    /// Handle was read under an older row layout.
    Stale,
}

/// How a pool's backing data looked when last checked. Any change to either
/// field means the rows may have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceStamp {
    pub modified_at: Ms,
    pub len: u64,
}

/// Durable storage of reservation rows, one ordered list per pool.
///
/// A pool that has never been written reads as empty.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read_all(&self, pool: &PoolId) -> Result<RecordSet, StoreError>;

    /// Cheap fingerprint of the pool's backing data; `None` if it does not exist.
    async fn source_stamp(&self, pool: &PoolId) -> Result<Option<SourceStamp>, StoreError>;

    async fn append(&self, pool: &PoolId, row: Reservation) -> Result<RowHandle, StoreError>;

    async fn update_field(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        update: FieldUpdate,
    ) -> Result<UpdateOutcome, StoreError>;
}

#[derive(Default)]
struct MemoryPool {
    rows: Vec<Reservation>,
    generation: u64,
    modified_at: Option<Ms>,
}

/// Volatile store for tests and embedding. Modification stamps are a logical
/// counter rather than wall time.
#[derive(Default)]
pub struct MemoryStore {
    pools: Mutex<HashMap<PoolId, MemoryPool>>,
    revision: AtomicI64,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read_all` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Overwrite a pool wholesale, as an edit made outside the ledger would.
    /// Existing handles for the pool become stale.
    pub fn replace_rows(&self, pool: &PoolId, rows: Vec<Reservation>) {
        let stamp = self.bump();
        let mut pools = self.pools.lock();
        let p = pools.entry(pool.clone()).or_default();
        p.rows = rows;
        p.generation += 1;
        p.modified_at = Some(stamp);
    }

    fn bump(&self) -> Ms {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read_all(&self, pool: &PoolId) -> Result<RecordSet, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let pools = self.pools.lock();
        Ok(pools
            .get(pool)
            .map(|p| RecordSet {
                rows: p.rows.clone(),
                generation: p.generation,
                modified_at: p.modified_at,
            })
            .unwrap_or_default())
    }

    async fn source_stamp(&self, pool: &PoolId) -> Result<Option<SourceStamp>, StoreError> {
        let pools = self.pools.lock();
        Ok(pools.get(pool).and_then(|p| {
            p.modified_at.map(|modified_at| SourceStamp {
                modified_at,
                len: p.rows.len() as u64,
            })
        }))
    }

    async fn append(&self, pool: &PoolId, row: Reservation) -> Result<RowHandle, StoreError> {
        let stamp = self.bump();
        let mut pools = self.pools.lock();
        let p = pools.entry(pool.clone()).or_default();
        p.rows.push(row);
        p.modified_at = Some(stamp);
        Ok(RowHandle {
            index: p.rows.len() - 1,
            generation: p.generation,
        })
    }

    async fn update_field(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        update: FieldUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let stamp = self.bump();
        let mut pools = self.pools.lock();
        let Some(p) = pools.get_mut(pool) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if handle.generation != p.generation {
            return Ok(UpdateOutcome::Stale);
        }
        let Some(row) = p.rows.get_mut(handle.index) else {
            return Ok(UpdateOutcome::NotFound);
        };
        update.apply(row);
        p.modified_at = Some(stamp);
        Ok(UpdateOutcome::Applied)
    }
}
