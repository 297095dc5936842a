use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use rigledger::clock::ManualClock;
use rigledger::engine::{Ledger, LedgerError};
use rigledger::file_store::FileStore;
use rigledger::model::*;
use rigledger::pool::Deployment;
use rigledger::store::RecordStore;
use rigledger::sweep::run_sweeper;

// ── Test infrastructure ──────────────────────────────────────

const T: Ms = 1_749_513_600_000;

fn test_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rigledger_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn open_ledger(root: &PathBuf, clock: Arc<ManualClock>) -> (Arc<Ledger>, Arc<FileStore>) {
    let store = Arc::new(FileStore::new(root.join("data"), root.join("backups"), 1000).unwrap());
    let ledger = Arc::new(Ledger::new(Deployment::default(), store.clone(), clock, 30_000));
    (ledger, store)
}

fn request(pool: &str, compute: &str, gpu: &str, estimated: &str) -> ReservationRequest {
    ReservationRequest {
        pool: PoolId::from(pool),
        start_time: T,
        owner: "dana".into(),
        compute: compute.into(),
        gpu: gpu.into(),
        remote_desktop: false,
        task_kind: "cfd".into(),
        estimated_duration: estimated.into(),
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn reservations_survive_restart() {
    let root = test_root();
    let clock = Arc::new(ManualClock::new(T));
    {
        let (ledger, _) = open_ledger(&root, clock.clone());
        ledger.reserve(request("9755", "0,1", "0", "2h")).await.unwrap();
        ledger.reserve(request("5520", "16", "Yes", "1天")).await.unwrap();
    }

    let (ledger, _) = open_ledger(&root, clock);
    let snap = ledger.remaining_resources().await.unwrap();
    assert_eq!(snap.pools[&PoolId::from("9755")].compute.available, Some(vec![2, 3]));
    assert_eq!(snap.pools[&PoolId::from("9755")].gpu.available, Some(vec![1]));
    assert_eq!(snap.pools[&PoolId::from("5520")].compute.remaining, 40);
    assert_eq!(snap.pools[&PoolId::from("5520")].gpu.remaining, 0);

    let err = ledger
        .reserve(request("9755", "1", "", "1h"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Rejected(_)));
}

#[tokio::test]
async fn one_hour_reservation_expires_and_freezes() {
    let root = test_root();
    let clock = Arc::new(ManualClock::new(T));
    let (ledger, store) = open_ledger(&root, clock.clone());

    let handle = ledger
        .reserve(request("9755", "3", "", "1小时"))
        .await
        .unwrap();

    clock.advance(61 * MINUTE_MS);
    let report = ledger.sweep_once().await;
    assert_eq!(report.expired, 1);

    let set = store.read_all(&PoolId::from("9755")).await.unwrap();
    assert_eq!(set.rows[0].status, CompletionStatus::Completed);
    assert_eq!(set.rows[0].actual_duration.as_deref(), Some("1小时"));

    let err = ledger
        .set_status(&PoolId::from("9755"), handle, CompletionStatus::Open)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WindowElapsed { .. }));

    assert_eq!(ledger.sweep_once().await.changed(), 0);
}

#[tokio::test]
async fn background_sweeper_runs_until_cancelled() {
    let root = test_root();
    let clock = Arc::new(ManualClock::new(T));
    let (ledger, store) = open_ledger(&root, clock.clone());
    ledger.reserve(request("5520", "all", "", "30min")).await.unwrap();
    clock.advance(HOUR_MS);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_sweeper(ledger.clone(), Duration::from_millis(20), cancel.clone()));

    let pool = PoolId::from("5520");
    let mut done = false;
    for _ in 0..200 {
        let set = store.read_all(&pool).await.unwrap();
        if set.rows[0].status == CompletionStatus::Completed {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done, "row was never expired");

    let snap = ledger.remaining_resources().await.unwrap();
    assert_eq!(snap.pools[&pool].compute.remaining, 56);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}

#[tokio::test]
async fn mutations_write_backups() {
    let root = test_root();
    let clock = Arc::new(ManualClock::new(T));
    let (ledger, _) = open_ledger(&root, clock.clone());

    let first = ledger.reserve(request("9755", "0", "", "2h")).await.unwrap();
    ledger.reserve(request("9755", "1", "", "2h")).await.unwrap();
    clock.advance(5 * MINUTE_MS);
    ledger
        .set_status(&PoolId::from("9755"), first, CompletionStatus::Completed)
        .await
        .unwrap();

    // Second append plus the two field writes of a manual completion.
    let backups = std::fs::read_dir(root.join("backups")).unwrap().count();
    assert_eq!(backups, 3);
}

#[tokio::test]
async fn rejected_request_leaves_no_trace() {
    let root = test_root();
    let clock = Arc::new(ManualClock::new(T));
    let (ledger, store) = open_ledger(&root, clock);
    ledger.reserve(request("9755", "0,1,2,3", "", "2h")).await.unwrap();

    let err = ledger
        .reserve(request("9755", "2", "", "2h"))
        .await
        .unwrap_err();
    let LedgerError::Rejected(violations) = err else {
        panic!("expected rejection, got {err:?}");
    };
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0].to_string(), "compute unit 2 is already occupied");

    let set = store.read_all(&PoolId::from("9755")).await.unwrap();
    assert_eq!(set.rows.len(), 1);
}
