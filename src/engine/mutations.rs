use tracing::{debug, info};

use crate::duration::format_elapsed;
use crate::limits::*;
use crate::model::*;

use super::conflict::{validate, Claims};
use super::occupancy::pool_usage;
use super::{Ledger, LedgerError};

impl Ledger {
    /// Validate a new reservation against current occupancy and append it.
    ///
    /// Runs under the pool's write lock, so two requests for the same units
    /// cannot both pass validation.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<RowHandle, LedgerError> {
        check_request(&request)?;
        self.spec(&request.pool)?;
        let pool = request.pool.clone();

        let _guard = self.lock_pool(&pool).await?;
        if self.records(&pool).await?.rows.len() >= MAX_ROWS_PER_POOL {
            return Err(LedgerError::LimitExceeded("too many reservations in pool"));
        }

        let violations = self.validate(&request).await?;
        if !violations.is_empty() {
            metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "pool" => pool.to_string(), "result" => "rejected")
                .increment(1);
            debug!("rejected reservation for {} on pool {pool}: {} violation(s)", request.owner, violations.len());
            return Err(LedgerError::Rejected(violations));
        }

        let (_, row) = request.into_reservation();
        let owner = row.owner.clone();
        let appended = self.store.append(&pool, row).await;
        self.invalidate(&pool);
        let handle = appended?;

        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "pool" => pool.to_string(), "result" => "accepted")
            .increment(1);
        debug!("accepted reservation for {owner} on pool {pool} at row {}", handle.index);
        Ok(handle)
    }

    /// Change a reservation's completion status by hand.
    ///
    /// Only rows still inside their estimated window can change. Completing
    /// records the elapsed time; reopening clears it and re-checks the row's
    /// claims against everything else that is open.
    pub async fn set_status(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        status: CompletionStatus,
    ) -> Result<(), LedgerError> {
        self.spec(pool)?;
        let _guard = self.lock_pool(pool).await?;
        let result = self.apply_status(pool, handle, status).await;
        self.invalidate(pool);

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            crate::observability::STATUS_UPDATES_TOTAL,
            "pool" => pool.to_string(),
            "status" => status_label(status),
            "result" => outcome
        )
        .increment(1);
        result
    }

    async fn apply_status(&self, pool: &PoolId, handle: RowHandle, status: CompletionStatus) -> Result<(), LedgerError> {
        let set = self.fresh_records(pool).await?;
        if set.generation != handle.generation {
            return Err(LedgerError::StaleHandle {
                pool: pool.clone(),
                index: handle.index,
            });
        }
        let row = set.rows.get(handle.index).ok_or_else(|| LedgerError::NotFound {
            pool: pool.clone(),
            index: handle.index,
        })?;

        let now = self.now();
        if now >= row.end_time() {
            return Err(LedgerError::WindowElapsed {
                pool: pool.clone(),
                index: handle.index,
            });
        }
        if row.status == status {
            return Ok(());
        }

        match (row.is_open(), status.is_open()) {
            (true, false) => {
                let elapsed = format_elapsed(now - row.start_time);
                self.write_field(pool, handle, FieldUpdate::ActualDuration(Some(elapsed)))
                    .await?;
                info!("row {} of pool {pool} completed by hand", handle.index);
            }
            (false, true) => {
                let spec = self.spec(pool)?;
                let usage = pool_usage(spec, &set.rows);
                let violations = validate(spec, &usage, Claims::from(row));
                if !violations.is_empty() {
                    return Err(LedgerError::Rejected(violations));
                }
                self.write_field(pool, handle, FieldUpdate::ActualDuration(None)).await?;
                info!("row {} of pool {pool} reopened", handle.index);
            }
            _ => {}
        }
        self.write_field(pool, handle, FieldUpdate::Status(status)).await
    }

    /// Overwrite the recorded actual duration of a row.
    pub async fn set_actual_duration(
        &self,
        pool: &PoolId,
        handle: RowHandle,
        actual: Option<String>,
    ) -> Result<(), LedgerError> {
        if actual.as_ref().is_some_and(|s| s.len() > MAX_DURATION_TEXT_LEN) {
            return Err(LedgerError::LimitExceeded("actual duration too long"));
        }
        self.spec(pool)?;
        let _guard = self.lock_pool(pool).await?;
        let result = self
            .write_field(pool, handle, FieldUpdate::ActualDuration(actual))
            .await;
        self.invalidate(pool);
        result
    }
}

fn check_request(request: &ReservationRequest) -> Result<(), LedgerError> {
    if request.owner.trim().is_empty() {
        return Err(LedgerError::MissingField("owner"));
    }
    if request.estimated_duration.trim().is_empty() {
        return Err(LedgerError::MissingField("estimated_duration"));
    }
    if request.owner.len() > MAX_OWNER_LEN {
        return Err(LedgerError::LimitExceeded("owner too long"));
    }
    if request.task_kind.len() > MAX_TASK_KIND_LEN {
        return Err(LedgerError::LimitExceeded("task kind too long"));
    }
    if request.compute.len() > MAX_DESCRIPTOR_LEN || request.gpu.len() > MAX_DESCRIPTOR_LEN {
        return Err(LedgerError::LimitExceeded("resource descriptor too long"));
    }
    if request.estimated_duration.len() > MAX_DURATION_TEXT_LEN {
        return Err(LedgerError::LimitExceeded("estimated duration too long"));
    }
    Ok(())
}

fn status_label(status: CompletionStatus) -> &'static str {
    match status {
        CompletionStatus::Unset => "unset",
        CompletionStatus::Open => "open",
        CompletionStatus::Completed => "completed",
    }
}
