use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::*;
use crate::pool::{Capacity, Deployment, PoolSpec, ResourceKind};

/// A resource descriptor as written on a row, interpreted against the pool's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Blank, `No`, or an empty list.
    Nothing,
    /// Explicit unit ids on an enumerable pool. Unparsable tokens are kept aside.
    Units { units: Vec<u32>, malformed: Vec<String> },
    /// Legacy `Yes` on an enumerable GPU pool: the lowest unit still free.
    AnyFree,
    /// A count on a scalar pool.
    Quantity(i64),
    /// `all` on a scalar pool: the pool's total.
    All,
    Malformed(String),
}

fn is_blank(text: &str) -> bool {
    text.is_empty() || text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("no")
}

fn is_yes(text: &str) -> bool {
    text.eq_ignore_ascii_case("yes") || text.eq_ignore_ascii_case("true")
}

impl Claim {
    pub fn parse(text: &str, capacity: Capacity, kind: ResourceKind) -> Self {
        let text = text.trim();
        if is_blank(text) {
            return Claim::Nothing;
        }
        match capacity {
            Capacity::Enumerable { .. } => {
                if kind == ResourceKind::Gpu && is_yes(text) {
                    return Claim::AnyFree;
                }
                let mut units = Vec::new();
                let mut malformed = Vec::new();
                for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    match token.parse::<u32>() {
                        Ok(u) => units.push(u),
                        Err(_) => malformed.push(token.to_string()),
                    }
                }
                if units.is_empty() && malformed.is_empty() {
                    Claim::Nothing
                } else {
                    Claim::Units { units, malformed }
                }
            }
            Capacity::Scalar { .. } => {
                if text.eq_ignore_ascii_case("all") {
                    Claim::All
                } else if kind == ResourceKind::Gpu && is_yes(text) {
                    Claim::Quantity(1)
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => Claim::Quantity(n),
                        Err(_) => Claim::Malformed(text.to_string()),
                    }
                }
            }
        }
    }
}

/// Usage of one resource of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityUsage {
    pub total: u32,
    /// May exceed `total` on scalar pools when counts are booked after an `all`.
    pub used: u32,
    pub remaining: u32,
    /// Sorted, enumerable pools only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupied: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<Vec<u32>>,
}

impl CapacityUsage {
    pub fn occupied_units(&self) -> &[u32] {
        self.occupied.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub compute: CapacityUsage,
    pub gpu: CapacityUsage,
    /// Open reservations that use the remote desktop.
    pub remote_desktop_in_use: u32,
}

impl PoolUsage {
    pub fn resource(&self, kind: ResourceKind) -> &CapacityUsage {
        match kind {
            ResourceKind::Compute => &self.compute,
            ResourceKind::Gpu => &self.gpu,
        }
    }
}

/// Remaining-capacity view across the deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResourceSnapshot {
    pub pools: BTreeMap<PoolId, PoolUsage>,
}

/// Running tally for one resource while rows are scanned.
enum Tally {
    Units { units: u32, occupied: BTreeSet<u32> },
    Scalar { total: u32, used: u64 },
}

impl Tally {
    fn new(capacity: Capacity) -> Self {
        match capacity {
            Capacity::Enumerable { units } => Tally::Units {
                units,
                occupied: BTreeSet::new(),
            },
            Capacity::Scalar { total } => Tally::Scalar { total, used: 0 },
        }
    }

    fn add(&mut self, claim: &Claim) {
        match (self, claim) {
            (Tally::Units { units, occupied }, Claim::Units { units: ids, .. }) => {
                let limit = *units;
                occupied.extend(ids.iter().copied().filter(|u| *u < limit));
            }
            (Tally::Units { units, occupied }, Claim::AnyFree) => {
                if let Some(free) = (0..*units).find(|u| !occupied.contains(u)) {
                    occupied.insert(free);
                }
            }
            (Tally::Scalar { used, .. }, Claim::Quantity(n)) if *n > 0 => {
                *used += *n as u64;
            }
            // Legacy: `all` pins usage to the total; bookings counted after it still add on top.
            (Tally::Scalar { total, used }, Claim::All) => {
                *used = u64::from(*total);
            }
            _ => {}
        }
    }

    fn finish(self) -> CapacityUsage {
        match self {
            Tally::Units { units, occupied } => {
                let available: Vec<u32> = (0..units).filter(|u| !occupied.contains(u)).collect();
                CapacityUsage {
                    total: units,
                    used: occupied.len() as u32,
                    remaining: available.len() as u32,
                    occupied: Some(occupied.into_iter().collect()),
                    available: Some(available),
                }
            }
            Tally::Scalar { total, used } => {
                let used = u32::try_from(used).unwrap_or(u32::MAX);
                CapacityUsage {
                    total,
                    used,
                    remaining: total.saturating_sub(used),
                    occupied: None,
                    available: None,
                }
            }
        }
    }
}

/// Usage of one pool from its rows. Only open rows count; malformed
/// descriptors and out-of-range units are skipped.
pub fn pool_usage(spec: &PoolSpec, rows: &[Reservation]) -> PoolUsage {
    let mut compute = Tally::new(spec.compute);
    let mut gpu = Tally::new(spec.gpu);
    let mut remote_desktop_in_use = 0;

    for row in rows.iter().filter(|r| r.is_open()) {
        compute.add(&Claim::parse(&row.compute, spec.compute, ResourceKind::Compute));
        gpu.add(&Claim::parse(&row.gpu, spec.gpu, ResourceKind::Gpu));
        if row.remote_desktop {
            remote_desktop_in_use += 1;
        }
    }

    PoolUsage {
        compute: compute.finish(),
        gpu: gpu.finish(),
        remote_desktop_in_use,
    }
}

/// Snapshot every pool of the deployment. Pools with no rows supplied are idle.
pub fn snapshot(deployment: &Deployment, rows_per_pool: &BTreeMap<PoolId, Vec<Reservation>>) -> ResourceSnapshot {
    let pools = deployment
        .pools
        .iter()
        .map(|spec| {
            let rows = rows_per_pool.get(&spec.id).map(Vec::as_slice).unwrap_or(&[]);
            (spec.id.clone(), pool_usage(spec, rows))
        })
        .collect();
    ResourceSnapshot { pools }
}
