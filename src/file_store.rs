use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::{RecordStore, SourceStamp, StoreError, UpdateOutcome};
use crate::wal;

#[derive(Default)]
struct PoolFile {
    generation: u64,
    last_seen: Option<SourceStamp>,
    appends_since_compact: u64,
}

/// One record log per pool under `data_dir`, with a backup copy taken before
/// every mutation. All access to a pool's file is serialized by a per-pool lock.
pub struct FileStore {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    compact_threshold: u64,
    pools: DashMap<PoolId, Arc<Mutex<PoolFile>>>,
}

impl FileStore {
    pub fn new(data_dir: PathBuf, backup_dir: PathBuf, compact_threshold: u64) -> io::Result<Self> {
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            data_dir,
            backup_dir,
            compact_threshold,
            pools: DashMap::new(),
        })
    }

    /// Path of a pool's log. Pool ids are sanitized to prevent path traversal.
    pub fn path_for(&self, pool: &PoolId) -> io::Result<PathBuf> {
        let safe = safe_name(pool)?;
        Ok(self.data_dir.join(format!("{safe}.log")))
    }

    fn pool_lock(&self, pool: &PoolId) -> Arc<Mutex<PoolFile>> {
        self.pools.entry(pool.clone()).or_default().value().clone()
    }

    /// Copy the pool file aside. Best-effort: a failure is logged, not returned.
    fn backup(&self, pool: &PoolId, path: &Path) {
        if !path.exists() {
            return;
        }
        let result = safe_name(pool).and_then(|safe| {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            let target = self.backup_dir.join(format!("{safe}_{stamp}_{}.log", Ulid::new()));
            fs::copy(path, &target).map(|_| target)
        });
        match result {
            Ok(target) => {
                debug!("backed up pool {pool} to {}", target.display());
                metrics::counter!(crate::observability::BACKUPS_TOTAL, "result" => "ok").increment(1);
            }
            Err(e) => {
                warn!("backup of pool {pool} failed: {e}");
                metrics::counter!(crate::observability::BACKUPS_TOTAL, "result" => "error").increment(1);
            }
        }
    }

    fn rows_at(path: &Path, pool: &PoolId) -> io::Result<Vec<Reservation>> {
        let replay = wal::replay(path)?;
        if replay.discarded_tail {
            warn!("pool {pool}: discarded corrupt tail of {}", path.display());
        }
        Ok(fold_events(&replay.events))
    }

    fn compact_if_due(&self, pool: &PoolId, path: &Path, state: &mut PoolFile) -> io::Result<()> {
        if state.appends_since_compact < self.compact_threshold {
            return Ok(());
        }
        let events: Vec<Event> = Self::rows_at(path, pool)?
            .into_iter()
            .map(|row| Event::RowAppended { row })
            .collect();
        wal::rewrite(path, &events)?;
        state.appends_since_compact = 0;
        debug!("compacted pool {pool} to {} rows", events.len());
        Ok(())
    }

    /// Housekeeping once an event is durably in the log. The write has
    /// happened, so failures here are logged and counted, never returned.
    fn after_commit(&self, pool: &PoolId, path: &Path, state: &mut PoolFile) {
        state.appends_since_compact += 1;
        if let Err(e) = self.compact_if_due(pool, path, state) {
            warn!("compaction of pool {pool} failed: {e}");
            metrics::counter!(crate::observability::STORE_MAINTENANCE_FAILURES_TOTAL, "step" => "compact")
                .increment(1);
        }
        // Without a fresh stamp the next read just records what it finds.
        state.last_seen = match stamp_of(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!("cannot stat pool {pool} after write: {e}");
                metrics::counter!(crate::observability::STORE_MAINTENANCE_FAILURES_TOTAL, "step" => "stamp")
                    .increment(1);
                None
            }
        };
    }
}

fn safe_name(pool: &PoolId) -> io::Result<String> {
    let safe: String = pool
        .as_str()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty pool name"));
    }
    Ok(safe)
}

fn stamp_of(path: &Path) -> io::Result<Option<SourceStamp>> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0);
    Ok(Some(SourceStamp {
        modified_at: mtime,
        len: meta.len(),
    }))
}

/// Note what is on disk now; a change we did not make means the row layout
/// may have shifted, so the generation moves on.
fn observe(state: &mut PoolFile, pool: &PoolId, current: Option<SourceStamp>) {
    if state.last_seen.is_some() && state.last_seen != current {
        state.generation += 1;
        warn!("pool {pool}: record file changed externally, row handles invalidated");
    }
    state.last_seen = current;
}

#[async_trait]
impl RecordStore for FileStore {
    async fn read_all(&self, pool: &PoolId) -> Result<RecordSet, StoreError> {
        let path = self.path_for(pool)?;
        let lock = self.pool_lock(pool);
        let mut state = lock.lock().await;

        let stamp = stamp_of(&path)?;
        observe(&mut state, pool, stamp);
        let rows = Self::rows_at(&path, pool)?;
        Ok(RecordSet {
            rows,
            generation: state.generation,
            modified_at: stamp.map(|s| s.modified_at),
        })
    }

    async fn source_stamp(&self, pool: &PoolId) -> Result<Option<SourceStamp>, StoreError> {
        let path = self.path_for(pool)?;
        Ok(stamp_of(&path)?)
    }

    async fn append(&self, pool: &PoolId, row: Reservation) -> Result<RowHandle, StoreError> {
        let path = self.path_for(pool)?;
        let lock = self.pool_lock(pool);
        let mut state = lock.lock().await;

        observe(&mut state, pool, stamp_of(&path)?);
        let index = Self::rows_at(&path, pool)?.len();

        self.backup(pool, &path);
        wal::append(&path, &[Event::RowAppended { row }])?;
        self.after_commit(pool, &path, &mut state);

        Ok(RowHandle {
            index,
            generation: state.generation,
        })
    }

    async fn update_field(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        update: FieldUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let path = self.path_for(pool)?;
        let lock = self.pool_lock(pool);
        let mut state = lock.lock().await;

        observe(&mut state, pool, stamp_of(&path)?);
        if handle.generation != state.generation {
            return Ok(UpdateOutcome::Stale);
        }
        if handle.index >= Self::rows_at(&path, pool)?.len() {
            return Ok(UpdateOutcome::NotFound);
        }

        self.backup(pool, &path);
        let event = Event::FieldUpdated {
            index: handle.index as u64,
            update,
        };
        wal::append(&path, &[event])?;
        self.after_commit(pool, &path, &mut state);
        Ok(UpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dirs(name: &str) -> (PathBuf, PathBuf) {
        let root = std::env::temp_dir()
            .join("rigledger_test_file_store")
            .join(format!("{name}_{}", Ulid::new()));
        (root.join("data"), root.join("backups"))
    }

    fn row(owner: &str) -> Reservation {
        Reservation {
            start_time: 0,
            owner: owner.into(),
            compute: "8".into(),
            gpu: "No".into(),
            remote_desktop: false,
            task_kind: "build".into(),
            estimated_duration: "3h".into(),
            actual_duration: None,
            status: CompletionStatus::Unset,
        }
    }

    #[tokio::test]
    async fn missing_pool_file_reads_empty() {
        let (data, backups) = test_dirs("missing");
        let store = FileStore::new(data, backups, 1000).unwrap();
        let set = store.read_all(&PoolId::from("5520")).await.unwrap();
        assert!(set.rows.is_empty());
        assert_eq!(set.modified_at, None);
    }

    #[tokio::test]
    async fn append_update_and_reopen() {
        let (data, backups) = test_dirs("reopen");
        let pool = PoolId::from("5520");
        {
            let store = FileStore::new(data.clone(), backups.clone(), 1000).unwrap();
            store.append(&pool, row("a")).await.unwrap();
            let h = store.append(&pool, row("b")).await.unwrap();
            assert_eq!(h.index, 1);
            let outcome = store
                .update_field(&pool, h, FieldUpdate::ActualDuration(Some("2h".into())))
                .await
                .unwrap();
            assert_eq!(outcome, UpdateOutcome::Applied);
        }

        let store = FileStore::new(data, backups, 1000).unwrap();
        let set = store.read_all(&pool).await.unwrap();
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[1].actual_duration.as_deref(), Some("2h"));
        assert!(set.modified_at.is_some());
    }

    #[tokio::test]
    async fn out_of_range_update_is_not_found() {
        let (data, backups) = test_dirs("not_found");
        let store = FileStore::new(data, backups, 1000).unwrap();
        let pool = PoolId::from("9755");
        store.append(&pool, row("a")).await.unwrap();
        let outcome = store
            .update_field(
                &pool,
                RowHandle { index: 3, generation: 0 },
                FieldUpdate::Status(CompletionStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }

    #[tokio::test]
    async fn mutations_leave_backups() {
        let (data, backups) = test_dirs("backups");
        let store = FileStore::new(data, backups.clone(), 1000).unwrap();
        let pool = PoolId::from("9755");
        // First append has nothing to back up yet.
        store.append(&pool, row("a")).await.unwrap();
        store.append(&pool, row("b")).await.unwrap();
        store
            .update_field(
                &pool,
                RowHandle { index: 0, generation: 0 },
                FieldUpdate::Status(CompletionStatus::Completed),
            )
            .await
            .unwrap();
        let count = fs::read_dir(&backups).unwrap().count();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn compaction_keeps_rows_and_order() {
        let (data, backups) = test_dirs("compact");
        let store = FileStore::new(data, backups, 5).unwrap();
        let pool = PoolId::from("5520");
        for owner in ["a", "b", "c", "d"] {
            store.append(&pool, row(owner)).await.unwrap();
        }
        store
            .update_field(
                &pool,
                RowHandle { index: 2, generation: 0 },
                FieldUpdate::Status(CompletionStatus::Completed),
            )
            .await
            .unwrap();

        let set = store.read_all(&pool).await.unwrap();
        let owners: Vec<_> = set.rows.iter().map(|r| r.owner.as_str()).collect();
        assert_eq!(owners, ["a", "b", "c", "d"]);
        assert_eq!(set.rows[2].status, CompletionStatus::Completed);
        assert_eq!(set.generation, 0);

        // Fifth write triggered a rewrite into one entry per row.
        let replay = wal::replay(&store.path_for(&pool).unwrap()).unwrap();
        assert_eq!(replay.events.len(), 4);
        assert!(replay.events.iter().all(|e| matches!(e, Event::RowAppended { .. })));
    }

    #[tokio::test]
    async fn external_edit_bumps_generation() {
        let (data, backups) = test_dirs("external");
        let store = FileStore::new(data, backups, 1000).unwrap();
        let pool = PoolId::from("9755");
        let h = store.append(&pool, row("a")).await.unwrap();
        store.read_all(&pool).await.unwrap();

        // Someone rewrites the file behind the store's back.
        let path = store.path_for(&pool).unwrap();
        wal::rewrite(
            &path,
            &[Event::RowAppended { row: row("z") }, Event::RowAppended { row: row("a") }],
        )
        .unwrap();

        let set = store.read_all(&pool).await.unwrap();
        assert_eq!(set.generation, 1);
        let outcome = store
            .update_field(&pool, h, FieldUpdate::Status(CompletionStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
    }

    #[tokio::test]
    async fn failed_compaction_does_not_undo_the_write() {
        let (data, backups) = test_dirs("compact_fails");
        let store = FileStore::new(data, backups, 1).unwrap();
        let pool = PoolId::from("9755");
        let path = store.path_for(&pool).unwrap();
        // A directory where the rewrite wants its temp file.
        fs::create_dir_all(path.with_extension("log.tmp")).unwrap();

        let h = store.append(&pool, row("a")).await.unwrap();
        assert_eq!(h.index, 0);
        let outcome = store
            .update_field(&pool, h, FieldUpdate::Status(CompletionStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        let set = store.read_all(&pool).await.unwrap();
        assert_eq!(set.rows.len(), 1);
        assert_eq!(set.rows[0].status, CompletionStatus::Completed);
        assert_eq!(set.generation, 0);
    }

    #[tokio::test]
    async fn source_stamp_sees_edit_with_unchanged_mtime() {
        let (data, backups) = test_dirs("same_mtime");
        let store = FileStore::new(data, backups, 1000).unwrap();
        let pool = PoolId::from("5520");
        store.append(&pool, row("a")).await.unwrap();
        let before = store.source_stamp(&pool).await.unwrap().unwrap();

        let path = store.path_for(&pool).unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        wal::append(&path, &[Event::RowAppended { row: row("b") }]).unwrap();
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let after = store.source_stamp(&pool).await.unwrap().unwrap();
        assert_eq!(after.modified_at, before.modified_at);
        assert_ne!(after, before);
    }

    #[test]
    fn pool_names_are_sanitized() {
        let (data, backups) = test_dirs("sanitize");
        let store = FileStore::new(data.clone(), backups, 1000).unwrap();
        assert_eq!(store.path_for(&PoolId::from("../evil")).unwrap(), data.join("evil.log"));
        assert!(store.path_for(&PoolId::from("../..")).is_err());
    }
}
