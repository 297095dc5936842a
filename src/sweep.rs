use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Ledger;

/// Background task that periodically reconciles reservations against the clock.
///
/// The first pass runs immediately. Returns once `cancel` fires; a pass that is
/// already running finishes first.
pub async fn run_sweeper(ledger: Arc<Ledger>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let report = ledger.sweep_once().await;
        if report.changed() > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                refreshed = report.refreshed,
                failed = report.failed,
                "sweep pass complete"
            );
        } else {
            debug!("sweep pass complete, nothing to do");
        }
    }
    info!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::pool::Deployment;
    use crate::store::{MemoryStore, RecordStore};

    #[tokio::test]
    async fn sweeper_expires_rows_and_stops_on_cancel() {
        let start = 1_700_000_000_000;
        let clock = Arc::new(ManualClock::new(start + 2 * HOUR_MS));
        let store = Arc::new(MemoryStore::new());
        let pool = PoolId::from("9755");
        store
            .append(
                &pool,
                Reservation {
                    start_time: start,
                    owner: "carol".into(),
                    compute: "0".into(),
                    gpu: String::new(),
                    remote_desktop: false,
                    task_kind: "build".into(),
                    estimated_duration: "1h".into(),
                    actual_duration: None,
                    status: CompletionStatus::Open,
                },
            )
            .await
            .unwrap();

        let ledger = Arc::new(Ledger::new(Deployment::default(), store.clone(), clock, 30_000));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(ledger, Duration::from_millis(10), cancel.clone()));

        let mut expired = false;
        for _ in 0..100 {
            let set = store.read_all(&pool).await.unwrap();
            if set.rows[0].status == CompletionStatus::Completed {
                assert_eq!(set.rows[0].actual_duration.as_deref(), Some("1h"));
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(expired, "sweeper never expired the row");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
