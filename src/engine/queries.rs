use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::fingerprint;
use crate::model::*;
use crate::pool::ResourceKind;

use super::conflict::{validate, Claims, Violation};
use super::occupancy::{snapshot, ResourceSnapshot};
use super::{records_key, Ledger, LedgerError, RESOURCES_KEY};

impl Ledger {
    /// All rows of a pool, served from cache while fresh.
    pub async fn records(&self, pool: &PoolId) -> Result<Arc<RecordSet>, LedgerError> {
        self.spec(pool)?;
        let stamp = self.store.source_stamp(pool).await?;
        self.records
            .get_or_compute(&records_key(pool), self.cache_ttl, fingerprint(&stamp), || async {
                Ok::<_, LedgerError>(self.store.read_all(pool).await?)
            })
            .await
    }

    /// All rows of a pool straight from the store.
    pub async fn fresh_records(&self, pool: &PoolId) -> Result<RecordSet, LedgerError> {
        self.spec(pool)?;
        Ok(self.store.read_all(pool).await?)
    }

    /// Remaining capacity of every pool, served from cache while fresh.
    pub async fn remaining_resources(&self) -> Result<Arc<ResourceSnapshot>, LedgerError> {
        let mut stamps = Vec::with_capacity(self.deployment.pools.len());
        for id in self.deployment.ids() {
            stamps.push(self.store.source_stamp(id).await?);
        }

        self.resources
            .get_or_compute(RESOURCES_KEY, self.cache_ttl, fingerprint(&stamps), || async {
                let mut rows = BTreeMap::new();
                for id in self.deployment.ids() {
                    rows.insert(id.clone(), self.records(id).await?.rows.clone());
                }
                let snap = snapshot(&self.deployment, &rows);
                record_gauges(&snap);
                Ok::<_, LedgerError>(snap)
            })
            .await
    }

    /// Everything that would stop `request` from being granted right now.
    pub async fn validate(&self, request: &ReservationRequest) -> Result<Vec<Violation>, LedgerError> {
        let spec = self.spec(&request.pool)?;
        let resources = self.remaining_resources().await?;
        let usage = resources
            .pools
            .get(&request.pool)
            .ok_or_else(|| LedgerError::UnknownPool(request.pool.clone()))?;
        Ok(validate(spec, usage, Claims::from(request)))
    }
}

fn record_gauges(snap: &ResourceSnapshot) {
    for (pool, usage) in &snap.pools {
        for kind in [ResourceKind::Compute, ResourceKind::Gpu] {
            metrics::gauge!(
                crate::observability::POOL_REMAINING,
                "pool" => pool.to_string(),
                "resource" => kind.to_string()
            )
            .set(f64::from(usage.resource(kind).remaining));
        }
    }
}
