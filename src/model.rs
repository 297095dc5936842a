use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Name of a resource pool (one server in a deployment).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PoolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Completion state as stored on a row.
///
/// Legacy rows carry a blank cell; those are kept apart from an explicit
/// `Open` so they round-trip untouched, but both count as open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompletionStatus {
    #[default]
    Unset,
    Open,
    Completed,
}

impl CompletionStatus {
    pub fn is_open(self) -> bool {
        !matches!(self, CompletionStatus::Completed)
    }

    /// Interpret a status cell as entered by a human or a legacy form.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() || label.eq_ignore_ascii_case("nan") {
            return CompletionStatus::Unset;
        }
        if label.eq_ignore_ascii_case("yes")
            || label.eq_ignore_ascii_case("completed")
            || label == "已完成"
        {
            CompletionStatus::Completed
        } else {
            CompletionStatus::Open
        }
    }
}

/// One reservation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub start_time: Ms,
    pub owner: String,
    /// Node list (`"0,1"`), core count (`"8"`) or `"all"`, depending on the pool.
    pub compute: String,
    /// GPU index list or a boolean-style marker (`"Yes"` / `"No"`).
    pub gpu: String,
    pub remote_desktop: bool,
    pub task_kind: String,
    /// Free text as entered, e.g. `"2h"`, `"1天"`, `"2025.6.10~2025.6.12"`.
    pub estimated_duration: String,
    pub actual_duration: Option<String>,
    pub status: CompletionStatus,
}

impl Reservation {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Natural end of the reservation window.
    pub fn end_time(&self) -> Ms {
        let hours = crate::duration::parse_hours(&self.estimated_duration);
        // f64 -> i64 casts saturate, so absurd durations clamp instead of wrapping.
        let window = (hours * HOUR_MS as f64) as Ms;
        self.start_time.saturating_add(window)
    }

    pub fn phase(&self, now: Ms) -> Phase {
        match (self.is_open(), now >= self.end_time()) {
            (true, _) => Phase::Open,
            (false, false) => Phase::CompletedEarly,
            (false, true) => Phase::Expired,
        }
    }
}

/// A new reservation as submitted, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub pool: PoolId,
    pub start_time: Ms,
    pub owner: String,
    pub compute: String,
    pub gpu: String,
    pub remote_desktop: bool,
    pub task_kind: String,
    pub estimated_duration: String,
}

impl ReservationRequest {
    /// The row this request becomes once accepted.
    pub fn into_reservation(self) -> (PoolId, Reservation) {
        let row = Reservation {
            start_time: self.start_time,
            owner: self.owner,
            compute: self.compute,
            gpu: self.gpu,
            remote_desktop: self.remote_desktop,
            task_kind: self.task_kind,
            estimated_duration: self.estimated_duration,
            actual_duration: None,
            status: CompletionStatus::Open,
        };
        (self.pool, row)
    }
}

/// Lifecycle position of a reservation at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    /// Marked done by a human before its window ended.
    CompletedEarly,
    /// Window elapsed; the row is frozen.
    Expired,
}

/// A single-field mutation on a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldUpdate {
    Status(CompletionStatus),
    ActualDuration(Option<String>),
}

impl FieldUpdate {
    pub fn apply(&self, row: &mut Reservation) {
        match self {
            FieldUpdate::Status(status) => row.status = *status,
            FieldUpdate::ActualDuration(text) => row.actual_duration = text.clone(),
        }
    }
}

/// Positional row identity plus the layout generation it was read under.
///
/// Rows have no surrogate key; a handle from an older generation may point at
/// a different row and is refused by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle {
    pub index: usize,
    pub generation: u64,
}

/// Everything `read_all` returns for one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    pub rows: Vec<Reservation>,
    pub generation: u64,
    /// `None` when the pool has never been written.
    pub modified_at: Option<Ms>,
}

impl RecordSet {
    pub fn handle(&self, index: usize) -> RowHandle {
        RowHandle {
            index,
            generation: self.generation,
        }
    }
}

/// Record log entries. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RowAppended { row: Reservation },
    FieldUpdated { index: u64, update: FieldUpdate },
}

/// Fold a log of events into rows. Updates to indexes that do not exist are dropped.
pub fn fold_events(events: &[Event]) -> Vec<Reservation> {
    let mut rows: Vec<Reservation> = Vec::new();
    for event in events {
        match event {
            Event::RowAppended { row } => rows.push(row.clone()),
            Event::FieldUpdated { index, update } => {
                if let Some(row) = usize::try_from(*index).ok().and_then(|i| rows.get_mut(i)) {
                    update.apply(row);
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(estimated: &str, status: CompletionStatus) -> Reservation {
        Reservation {
            start_time: 1_000,
            owner: "alice".into(),
            compute: "0".into(),
            gpu: String::new(),
            remote_desktop: false,
            task_kind: "train".into(),
            estimated_duration: estimated.into(),
            actual_duration: None,
            status,
        }
    }

    #[test]
    fn status_labels() {
        assert_eq!(CompletionStatus::from_label(""), CompletionStatus::Unset);
        assert_eq!(CompletionStatus::from_label("nan"), CompletionStatus::Unset);
        assert_eq!(CompletionStatus::from_label("Yes"), CompletionStatus::Completed);
        assert_eq!(CompletionStatus::from_label("No"), CompletionStatus::Open);
        assert!(CompletionStatus::Unset.is_open());
        assert!(!CompletionStatus::Completed.is_open());
    }

    #[test]
    fn end_time_uses_parsed_duration() {
        let r = row("2h", CompletionStatus::Open);
        assert_eq!(r.end_time(), 1_000 + 2 * HOUR_MS);

        let unparsable = row("soon", CompletionStatus::Open);
        assert_eq!(unparsable.end_time(), 1_000);
    }

    #[test]
    fn phases() {
        let open = row("1h", CompletionStatus::Unset);
        assert_eq!(open.phase(1_000 + 2 * HOUR_MS), Phase::Open);

        let done = row("1h", CompletionStatus::Completed);
        assert_eq!(done.phase(1_000 + HOUR_MS / 2), Phase::CompletedEarly);
        assert_eq!(done.phase(1_000 + HOUR_MS), Phase::Expired);
    }

    #[test]
    fn fold_applies_updates_in_order() {
        let events = vec![
            Event::RowAppended { row: row("1h", CompletionStatus::Unset) },
            Event::RowAppended { row: row("2h", CompletionStatus::Unset) },
            Event::FieldUpdated {
                index: 1,
                update: FieldUpdate::Status(CompletionStatus::Completed),
            },
            // Out of range: ignored
            Event::FieldUpdated {
                index: 7,
                update: FieldUpdate::Status(CompletionStatus::Completed),
            },
        ];
        let rows = fold_events(&events);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, CompletionStatus::Unset);
        assert_eq!(rows[1].status, CompletionStatus::Completed);
    }
}
