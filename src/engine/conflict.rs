use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Reservation, ReservationRequest};
use crate::pool::{Capacity, PoolSpec, ResourceKind};

use super::occupancy::{CapacityUsage, Claim, PoolUsage};

/// One reason a request cannot be granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    RemoteDesktopInUse { holders: u32 },
    MalformedUnit { kind: ResourceKind, token: String },
    UnknownUnit { kind: ResourceKind, unit: u32, units: u32 },
    UnitOccupied { kind: ResourceKind, unit: u32 },
    InsufficientCapacity { kind: ResourceKind, requested: u32, remaining: u32 },
    NonPositiveQuantity { kind: ResourceKind, value: i64 },
    MalformedQuantity { kind: ResourceKind, text: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::RemoteDesktopInUse { holders } => {
                write!(f, "remote desktop already in use by {holders} open reservation(s)")
            }
            Violation::MalformedUnit { kind, token } => write!(f, "{kind} unit `{token}` is not a number"),
            Violation::UnknownUnit { kind, unit, units } => {
                write!(f, "{kind} unit {unit} does not exist (valid: 0..{units})")
            }
            Violation::UnitOccupied { kind, unit } => write!(f, "{kind} unit {unit} is already occupied"),
            Violation::InsufficientCapacity {
                kind,
                requested,
                remaining,
            } => write!(f, "requested {requested} {kind} but only {remaining} remaining"),
            Violation::NonPositiveQuantity { kind, value } => {
                write!(f, "{kind} quantity must be positive, got {value}")
            }
            Violation::MalformedQuantity { kind, text } => write!(f, "{kind} quantity `{text}` is not a number"),
        }
    }
}

/// The resource-bearing part of a request.
#[derive(Debug, Clone, Copy)]
pub struct Claims<'a> {
    pub compute: &'a str,
    pub gpu: &'a str,
    pub remote_desktop: bool,
}

impl<'a> From<&'a Reservation> for Claims<'a> {
    fn from(r: &'a Reservation) -> Self {
        Self {
            compute: &r.compute,
            gpu: &r.gpu,
            remote_desktop: r.remote_desktop,
        }
    }
}

impl<'a> From<&'a ReservationRequest> for Claims<'a> {
    fn from(r: &'a ReservationRequest) -> Self {
        Self {
            compute: &r.compute,
            gpu: &r.gpu,
            remote_desktop: r.remote_desktop,
        }
    }
}

/// Check a request against a pool's current usage. Every problem found is
/// reported; an empty list means the request fits.
pub fn validate(spec: &PoolSpec, usage: &PoolUsage, claims: Claims<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    if claims.remote_desktop && usage.remote_desktop_in_use > 0 {
        violations.push(Violation::RemoteDesktopInUse {
            holders: usage.remote_desktop_in_use,
        });
    }

    for (kind, text) in [(ResourceKind::Compute, claims.compute), (ResourceKind::Gpu, claims.gpu)] {
        let capacity = spec.capacity(kind);
        let claim = Claim::parse(text, capacity, kind);
        check_claim(kind, capacity, usage.resource(kind), &claim, &mut violations);
    }

    violations
}

fn check_claim(
    kind: ResourceKind,
    capacity: Capacity,
    usage: &CapacityUsage,
    claim: &Claim,
    out: &mut Vec<Violation>,
) {
    match claim {
        Claim::Nothing => {}
        Claim::Units { units, malformed } => {
            out.extend(malformed.iter().map(|token| Violation::MalformedUnit {
                kind,
                token: token.clone(),
            }));
            let total = capacity.total();
            let occupied = usage.occupied_units();
            let mut requested = BTreeSet::new();
            for &unit in units {
                if unit >= total {
                    out.push(Violation::UnknownUnit { kind, unit, units: total });
                } else if requested.insert(unit) && occupied.contains(&unit) {
                    out.push(Violation::UnitOccupied { kind, unit });
                }
            }
            require(kind, requested.len() as u32, usage.remaining, out);
        }
        Claim::AnyFree => require(kind, 1, usage.remaining, out),
        Claim::All => require(kind, capacity.total(), usage.remaining, out),
        Claim::Quantity(n) if *n <= 0 => out.push(Violation::NonPositiveQuantity { kind, value: *n }),
        Claim::Quantity(n) => {
            let requested = u32::try_from(*n).unwrap_or(u32::MAX);
            require(kind, requested, usage.remaining, out);
        }
        Claim::Malformed(text) => {
            let violation = if capacity.is_enumerable() {
                Violation::MalformedUnit {
                    kind,
                    token: text.clone(),
                }
            } else {
                Violation::MalformedQuantity {
                    kind,
                    text: text.clone(),
                }
            };
            out.push(violation);
        }
    }
}

fn require(kind: ResourceKind, requested: u32, remaining: u32, out: &mut Vec<Violation>) {
    if requested > remaining {
        out.push(Violation::InsufficientCapacity {
            kind,
            requested,
            remaining,
        });
    }
}
