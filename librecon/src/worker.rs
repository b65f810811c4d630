use crate::{
    partition::Shard,
    prober::Probe,
    store::{ProgressStore, StoreError},
    types::{ProbeResult, Unit, Variant},
};
use futures::FutureExt;
use serde::Serialize;
use std::{any::Any, ops::AddAssign, panic::AssertUnwindSafe, time::Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Per-worker counters, summed by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Units skipped because every variant was already recorded.
    pub units_skipped: usize,
    /// Units whose variant loop ran.
    pub units_probed: usize,
    pub variants_probed: usize,
    pub variants_skipped: usize,
    /// Probes that ended unreachable, including probes that panicked.
    pub probe_failures: usize,
    pub persist_failures: usize,
    /// Inserts discarded because another writer recorded the pair first.
    pub duplicates: usize,
    /// Units never attempted because the worker could not start.
    pub abandoned: usize,
}

impl AddAssign for WorkerReport {
    fn add_assign(&mut self, other: Self) {
        self.units_skipped += other.units_skipped;
        self.units_probed += other.units_probed;
        self.variants_probed += other.variants_probed;
        self.variants_skipped += other.variants_skipped;
        self.probe_failures += other.probe_failures;
        self.persist_failures += other.persist_failures;
        self.duplicates += other.duplicates;
        self.abandoned += other.abandoned;
    }
}

pub struct Worker<'a, S, P> {
    id: usize,
    store: S,
    probe: P,
    variants: &'a [Variant],
}

impl<'a, S, P> Worker<'a, S, P>
where
    S: ProgressStore,
    P: Probe,
{
    pub fn new(id: usize, store: S, probe: P, variants: &'a [Variant]) -> Self {
        Self {
            id,
            store,
            probe,
            variants,
        }
    }

    /// Drains `shard` front to back. Nothing that happens to a single unit or
    /// variant stops the loop.
    pub async fn run(mut self, mut shard: Shard) -> WorkerReport {
        let span = info_span!("worker", id = self.id);
        async move {
            info!(units = shard.len(), "Worker started");
            let mut report = WorkerReport::default();
            while let Some(unit) = shard.pop() {
                self.process_unit(&unit, &mut report).await;
            }
            info!(
                probed = report.units_probed,
                skipped = report.units_skipped,
                "Worker finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn process_unit(&mut self, unit: &Unit, report: &mut WorkerReport) {
        match self
            .store
            .domain_fully_processed(unit, self.variants.len())
            .await
        {
            Ok(true) => {
                info!(rank = unit.rank, domain = %unit.domain, "Skipping previous entry");
                report.units_skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(rank = unit.rank, domain = %unit.domain, error = %e, "Dedup check failed, probing anyway");
            }
        }

        report.units_probed += 1;
        for variant in self.variants {
            self.process_variant(unit, variant, report).await;
        }
    }

    async fn process_variant(&mut self, unit: &Unit, variant: &Variant, report: &mut WorkerReport) {
        let url = variant.url(&unit.domain);

        match self.store.variant_processed(&url, unit.rank).await {
            Ok(true) => {
                debug!(rank = unit.rank, url = %url, "Skipping previous variant");
                report.variants_skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(rank = unit.rank, url = %url, error = %e, "Dedup check failed, probing anyway");
            }
        }

        info!(rank = unit.rank, url = %url, "Checking for HTTP headers");
        let start = Instant::now();
        let result = match AssertUnwindSafe(self.probe.probe(unit, variant))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    rank = unit.rank,
                    url = %url,
                    panic = panic_message(&*panic),
                    "Probe panicked, recording as unreachable"
                );
                ProbeResult::unreachable(unit, variant, start.elapsed())
            }
        };

        report.variants_probed += 1;
        if !result.is_reachable() {
            report.probe_failures += 1;
        }

        match self.store.persist(&result).await {
            Ok(()) => debug!(rank = unit.rank, url = %url, "Stored probe"),
            Err(StoreError::Duplicate { .. }) => {
                debug!(rank = unit.rank, url = %url, "Already stored by another worker, discarding");
                report.duplicates += 1;
                return;
            }
            Err(e) => {
                error!(rank = unit.rank, url = %url, error = %e, "Failed to store probe");
                report.persist_failures += 1;
                return;
            }
        }

        if !result.mx_records.is_empty() {
            if let Err(e) = self
                .store
                .persist_mx(unit.rank, &result.host, &result.mx_records)
                .await
            {
                error!(rank = unit.rank, host = %result.host, error = %e, "Failed to store MX records");
                report.persist_failures += 1;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
