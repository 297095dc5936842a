//! Static capacity of each pool in a deployment.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::PoolId;

/// Shape of one resource within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// Individually addressable units `0..units`.
    Enumerable { units: u32 },
    /// A plain quantity.
    Scalar { total: u32 },
}

impl Capacity {
    pub fn total(self) -> u32 {
        match self {
            Capacity::Enumerable { units } => units,
            Capacity::Scalar { total } => total,
        }
    }

    pub fn is_enumerable(self) -> bool {
        matches!(self, Capacity::Enumerable { .. })
    }
}

/// Which resource of a pool a claim refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Nodes or cores.
    Compute,
    Gpu,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Compute => f.write_str("compute"),
            ResourceKind::Gpu => f.write_str("gpu"),
        }
    }
}

/// Immutable per-deployment description of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub id: PoolId,
    pub compute: Capacity,
    pub gpu: Capacity,
}

impl PoolSpec {
    pub fn capacity(&self, kind: ResourceKind) -> Capacity {
        match kind {
            ResourceKind::Compute => self.compute,
            ResourceKind::Gpu => self.gpu,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("pool id must not be empty".into());
        }
        if self.compute.total() == 0 {
            return Err(format!("pool `{}`: compute capacity must be greater than 0", self.id));
        }
        Ok(())
    }
}

/// All pools of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub pools: Vec<PoolSpec>,
}

impl Default for Deployment {
    /// One 4-node server with two addressable GPUs, one 56-core server with a shared GPU.
    fn default() -> Self {
        Self {
            pools: vec![
                PoolSpec {
                    id: PoolId::from("9755"),
                    compute: Capacity::Enumerable { units: 4 },
                    gpu: Capacity::Enumerable { units: 2 },
                },
                PoolSpec {
                    id: PoolId::from("5520"),
                    compute: Capacity::Scalar { total: 56 },
                    gpu: Capacity::Scalar { total: 1 },
                },
            ],
        }
    }
}

impl Deployment {
    pub fn pool(&self, id: &PoolId) -> Option<&PoolSpec> {
        self.pools.iter().find(|p| &p.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PoolId> {
        self.pools.iter().map(|p| &p.id)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        let mut seen = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !seen.insert(&pool.id) {
                return Err(format!("duplicate pool id `{}`", pool.id));
            }
        }
        Ok(())
    }

    /// Parse a deployment from JSON and validate it.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let deployment: Deployment =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        deployment.validate()?;
        Ok(deployment)
    }
}
