use crate::{
    store::{gaps_below, ProgressStore, StoreConnector, StoreError},
    types::{ProbeResult, Unit},
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{collections::BTreeSet, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub rank: u64,
    pub host: String,
    pub mx: Vec<String>,
}

/// In-process ledger. Clones share the same data, so one `MemoryStore` can
/// serve as the connector for every worker.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    probes: Arc<DashMap<u64, Vec<ProbeResult>>>,
    mx: Arc<DashMap<u64, Vec<MxRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded probe, ordered by rank then insertion.
    pub fn results(&self) -> Vec<ProbeResult> {
        let mut ranks: Vec<u64> = self.probes.iter().map(|e| *e.key()).collect();
        ranks.sort_unstable();
        ranks
            .into_iter()
            .filter_map(|rank| self.probes.get(&rank).map(|e| e.value().clone()))
            .flatten()
            .collect()
    }

    pub fn mx_records(&self) -> Vec<MxRecord> {
        let mut records: Vec<MxRecord> = self
            .mx
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.rank);
        records
    }

    pub fn len(&self) -> usize {
        self.probes.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressStore for MemoryStore {
    async fn missing_ranks(
        &mut self,
        variants: usize,
        candidates: &BTreeSet<u64>,
    ) -> Result<BTreeSet<u64>, StoreError> {
        let counts: Vec<(u64, usize)> = self
            .probes
            .iter()
            .map(|e| (*e.key(), e.value().len()))
            .collect();
        Ok(gaps_below(counts, candidates, variants))
    }

    async fn lowest_unresolved_rank(&mut self) -> Result<u64, StoreError> {
        Ok(self.probes.iter().map(|e| *e.key()).max().map_or(1, |max| max + 1))
    }

    async fn domain_fully_processed(
        &mut self,
        unit: &Unit,
        variants: usize,
    ) -> Result<bool, StoreError> {
        let recorded = self.probes.get(&unit.rank).map_or(0, |e| {
            e.value().iter().filter(|p| p.domain == unit.domain).count()
        });
        Ok(recorded >= variants)
    }

    async fn variant_processed(&mut self, variant_url: &str, rank: u64) -> Result<bool, StoreError> {
        Ok(self
            .probes
            .get(&rank)
            .is_some_and(|e| e.value().iter().any(|p| p.variant_url == variant_url)))
    }

    async fn persist(&mut self, result: &ProbeResult) -> Result<(), StoreError> {
        match self.probes.entry(result.rank) {
            Entry::Occupied(mut entry) => {
                if entry.get().iter().any(|p| p.variant_url == result.variant_url) {
                    return Err(StoreError::Duplicate {
                        rank: result.rank,
                        url: result.variant_url.clone(),
                    });
                }
                entry.get_mut().push(result.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![result.clone()]);
            }
        }
        Ok(())
    }

    async fn persist_mx(&mut self, rank: u64, host: &str, mx: &[String]) -> Result<(), StoreError> {
        self.mx.entry(rank).or_default().push(MxRecord {
            rank,
            host: host.to_string(),
            mx: mx.to_vec(),
        });
        Ok(())
    }
}

impl StoreConnector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<Self::Store, StoreError> {
        Ok(self.clone())
    }
}
