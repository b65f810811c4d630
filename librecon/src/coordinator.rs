use crate::{
    config::{ConfigError, ReconConfig},
    http::ClientError,
    partition::{assign, partition, read_units, InputError, ResumePoint, Shard},
    prober::Probe,
    store::{ProgressStore, StoreConnector, StoreError},
    types::Unit,
    worker::{Worker, WorkerReport},
};
use serde::Serialize;
use std::{collections::BTreeSet, fmt::Display, io, thread, time::Instant};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{dispatcher, error, info, Dispatch};

/// Errors that stop a run before any worker starts.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("Store unreachable at startup: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub units_read: usize,
    /// Units left out by the resume filter.
    pub units_excluded: usize,
    pub units_queued: usize,
    pub shards: usize,
    #[serde(flatten)]
    pub totals: WorkerReport,
    /// Worker threads that panicked or could not be spawned.
    pub worker_failures: usize,
    pub elapsed_secs: f64,
}

/// Owns one run: resume lookup, sharding, the worker threads, and the final
/// tally.
///
/// Every worker is an OS thread with its own single-threaded runtime, store
/// handle and probe, bound to one shard for the whole run. `make_probe` is
/// called on the worker thread, inside that runtime.
pub struct Coordinator<'a, C, F> {
    config: &'a ReconConfig,
    connector: C,
    make_probe: F,
    dispatch: Dispatch,
}

impl<'a, C, F, P> Coordinator<'a, C, F>
where
    C: StoreConnector,
    F: Fn() -> Result<P, ClientError> + Sync,
    P: Probe,
{
    /// Workers log through the dispatcher that is current on the calling
    /// thread; use [`Coordinator::with_dispatch`] to hand them another one.
    pub fn new(config: &'a ReconConfig, connector: C, make_probe: F) -> Self {
        Self {
            config,
            connector,
            make_probe,
            dispatch: dispatcher::get_default(|d| d.clone()),
        }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Runs against the configured input list.
    pub fn run(&self) -> Result<RunSummary, ReconError> {
        self.execute(|| read_units(&self.config.input_list))
    }

    /// Runs against units already in memory.
    pub fn run_units(&self, units: Vec<Unit>) -> Result<RunSummary, ReconError> {
        self.execute(|| Ok(units))
    }

    fn execute<L>(&self, load: L) -> Result<RunSummary, ReconError>
    where
        L: FnOnce() -> Result<Vec<Unit>, InputError>,
    {
        let start = Instant::now();
        self.config.validate()?;

        let runtime = current_thread_runtime().map_err(ReconError::Runtime)?;
        let mut store = runtime.block_on(self.connector.connect())?;

        let units = load()?;
        let units_read = units.len();

        let ranks: BTreeSet<u64> = units.iter().map(|unit| unit.rank).collect();
        let resume = runtime.block_on(self.resume_point(&mut store, &ranks))?;
        drop(store);
        info!(
            lowest_unresolved = resume.lowest_unresolved,
            missing = resume.missing.len(),
            "Resuming from store"
        );

        info!("Creating shards for {} units", units_read);
        let parts = partition(units, &resume, self.config.shard_capacity);
        let units_excluded = parts.excluded;
        let units_queued = parts.queued();
        let shards = assign(parts.shards, self.config.workers);
        info!(
            queued = units_queued,
            excluded = units_excluded,
            shards = shards.len(),
            "Finished creating shards"
        );

        let shard_count = shards.len();
        let (totals, worker_failures) = self.spawn_workers(shards);

        let summary = RunSummary {
            units_read,
            units_excluded,
            units_queued,
            shards: shard_count,
            totals,
            worker_failures,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            probed = summary.totals.units_probed,
            skipped = summary.totals.units_skipped + summary.units_excluded,
            failures = summary.totals.probe_failures,
            "Run finished"
        );
        Ok(summary)
    }

    async fn resume_point(
        &self,
        store: &mut C::Store,
        ranks: &BTreeSet<u64>,
    ) -> Result<ResumePoint, StoreError> {
        Ok(ResumePoint {
            missing: store.missing_ranks(self.config.variants.len(), ranks).await?,
            lowest_unresolved: store.lowest_unresolved_rank().await?,
        })
    }

    fn spawn_workers(&self, shards: Vec<Shard>) -> (WorkerReport, usize) {
        thread::scope(|scope| {
            let handles: Vec<_> = shards
                .into_iter()
                .enumerate()
                .map(|(id, shard)| {
                    let queued = shard.len();
                    let handle = thread::Builder::new()
                        .name(format!("recon-worker-{}", id))
                        .spawn_scoped(scope, move || self.run_worker(id, shard));
                    (id, queued, handle)
                })
                .collect();

            let mut totals = WorkerReport::default();
            let mut failures = 0;
            for (id, queued, handle) in handles {
                match handle {
                    Ok(handle) => match handle.join() {
                        Ok(report) => totals += report,
                        Err(_) => {
                            error!(worker = id, "Worker thread panicked");
                            failures += 1;
                        }
                    },
                    Err(e) => {
                        totals += abandon(id, queued, &e);
                        failures += 1;
                    }
                }
            }
            (totals, failures)
        })
    }

    fn run_worker(&self, id: usize, shard: Shard) -> WorkerReport {
        dispatcher::with_default(&self.dispatch, || {
            let queued = shard.len();
            let runtime = match current_thread_runtime() {
                Ok(runtime) => runtime,
                Err(e) => return abandon(id, queued, &e),
            };
            runtime.block_on(async {
                let store = match self.connector.connect().await {
                    Ok(store) => store,
                    Err(e) => return abandon(id, queued, &e),
                };
                let probe = match (self.make_probe)() {
                    Ok(probe) => probe,
                    Err(e) => return abandon(id, queued, &e),
                };
                Worker::new(id, store, probe, &self.config.variants)
                    .run(shard)
                    .await
            })
        })
    }
}

fn current_thread_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

fn abandon(id: usize, queued: usize, reason: &dyn Display) -> WorkerReport {
    error!(worker = id, units = queued, error = %reason, "Worker could not start, abandoning shard");
    WorkerReport {
        abandoned: queued,
        ..WorkerReport::default()
    }
}
