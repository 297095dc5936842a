use std::time::Instant;

use tracing::{info, warn};

use crate::duration::format_elapsed;
use crate::model::*;

use super::{Ledger, LedgerError};

/// What the sweep does to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAction {
    /// Window elapsed on an open row. `actual` is set when the row had none.
    Expire { actual: Option<String> },
    /// Completed early and still inside its window; elapsed time moved on.
    Refresh { actual: String },
}

impl RowAction {
    /// Field writes for this action, in the order they must be applied.
    pub fn updates(&self) -> Vec<FieldUpdate> {
        match self {
            RowAction::Expire { actual } => {
                let mut updates = Vec::with_capacity(2);
                if let Some(text) = actual {
                    updates.push(FieldUpdate::ActualDuration(Some(text.clone())));
                }
                updates.push(FieldUpdate::Status(CompletionStatus::Completed));
                updates
            }
            RowAction::Refresh { actual } => vec![FieldUpdate::ActualDuration(Some(actual.clone()))],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RowAction::Expire { .. } => "expired",
            RowAction::Refresh { .. } => "refreshed",
        }
    }
}

/// Decide what, if anything, the sweep should change on `row` at `now`.
pub fn reconcile_row(row: &Reservation, now: Ms) -> Option<RowAction> {
    let end = row.end_time();
    if now >= end {
        if !row.is_open() {
            return None;
        }
        let blank = row.actual_duration.as_deref().is_none_or(|s| s.trim().is_empty());
        let actual = blank.then(|| row.estimated_duration.clone());
        return Some(RowAction::Expire { actual });
    }
    if row.is_open() {
        return None;
    }
    let elapsed = format_elapsed(now - row.start_time);
    if row.actual_duration.as_deref() == Some(elapsed.as_str()) {
        return None;
    }
    Some(RowAction::Refresh { actual: elapsed })
}

/// Outcome of one sweep over every pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub refreshed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.expired + self.refreshed
    }
}

impl Ledger {
    /// One reconciliation pass. Reads bypass the cache; a failing row is
    /// logged and skipped without stopping the pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();
        let ids: Vec<PoolId> = self.deployment.ids().cloned().collect();
        for pool in &ids {
            if let Err(e) = self.sweep_pool(pool, &mut report).await {
                warn!("sweep skipped pool {pool}: {e}");
                report.failed += 1;
            }
        }
        metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        report
    }

    async fn sweep_pool(&self, pool: &PoolId, report: &mut SweepReport) -> Result<(), LedgerError> {
        let _guard = self.lock_pool(pool).await?;
        let now = self.now();
        let set = self.fresh_records(pool).await?;

        let mut touched = false;
        for (index, row) in set.rows.iter().enumerate() {
            let Some(action) = reconcile_row(row, now) else {
                continue;
            };
            touched = true;
            match self.apply_action(pool, set.handle(index), &action).await {
                Ok(()) => {
                    match action {
                        RowAction::Expire { .. } => {
                            info!("sweep expired row {index} of pool {pool} (owner {})", row.owner);
                            report.expired += 1;
                        }
                        RowAction::Refresh { .. } => report.refreshed += 1,
                    }
                    metrics::counter!(crate::observability::SWEEP_ROWS_TOTAL, "action" => action.label())
                        .increment(1);
                }
                Err(e) => {
                    warn!("sweep failed on row {index} of pool {pool}: {e}");
                    report.failed += 1;
                    metrics::counter!(crate::observability::SWEEP_ROWS_TOTAL, "action" => "failed")
                        .increment(1);
                }
            }
        }

        if touched {
            self.invalidate(pool);
        }
        Ok(())
    }

    async fn apply_action(&self, pool: &PoolId, handle: RowHandle, action: &RowAction) -> Result<(), LedgerError> {
        for update in action.updates() {
            self.write_field(pool, handle, update).await?;
        }
        Ok(())
    }
}
