use crate::types::{ProbeResult, Unit};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to store: {0}")]
    Connect(String),
    #[error("Store query failed: {0}")]
    Query(String),
    /// Another writer already recorded this (rank, url) pair.
    #[error("Probe for rank {rank} at {url} is already recorded")]
    Duplicate { rank: u64, url: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

/// The ledger of completed probes.
///
/// One handle per worker; handles are never shared between threads. Every
/// method that counts variants takes the configured variant count, since a
/// unit is only fully processed once all of them are recorded.
#[allow(async_fn_in_trait)]
pub trait ProgressStore {
    /// Ranks among `candidates`, up to the high-water mark, that are not
    /// fully processed. Callers pass the ranks they are about to schedule, so
    /// the answer never outgrows the input.
    async fn missing_ranks(
        &mut self,
        variants: usize,
        candidates: &BTreeSet<u64>,
    ) -> Result<BTreeSet<u64>, StoreError>;

    /// First rank past everything recorded so far; 1 for an empty store.
    async fn lowest_unresolved_rank(&mut self) -> Result<u64, StoreError>;

    async fn domain_fully_processed(
        &mut self,
        unit: &Unit,
        variants: usize,
    ) -> Result<bool, StoreError>;

    async fn variant_processed(&mut self, variant_url: &str, rank: u64) -> Result<bool, StoreError>;

    /// Records one probe. Fails with [`StoreError::Duplicate`] if the
    /// (rank, url) pair is already present.
    async fn persist(&mut self, result: &ProbeResult) -> Result<(), StoreError>;

    async fn persist_mx(&mut self, rank: u64, host: &str, mx: &[String]) -> Result<(), StoreError>;
}

/// Opens store handles. Shared by reference across worker threads.
#[allow(async_fn_in_trait)]
pub trait StoreConnector: Sync {
    type Store: ProgressStore;

    async fn connect(&self) -> Result<Self::Store, StoreError>;
}

/// Candidates no higher than the highest recorded rank whose recorded variant
/// count is below `variants`.
pub(crate) fn gaps_below<I>(counts: I, candidates: &BTreeSet<u64>, variants: usize) -> BTreeSet<u64>
where
    I: IntoIterator<Item = (u64, usize)>,
{
    let mut max = 0;
    let mut complete = BTreeSet::new();
    for (rank, count) in counts {
        max = max.max(rank);
        if count >= variants {
            complete.insert(rank);
        }
    }
    candidates
        .range(..=max)
        .filter(|rank| !complete.contains(rank))
        .copied()
        .collect()
}
