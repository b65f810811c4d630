mod config;
mod coordinator;
mod dns;
mod headers;
mod http;
mod memory;
mod partition;
mod prober;
mod sqlite;
mod store;
mod types;
mod worker;

pub use config::{ConfigError, LogConfig, ReconConfig, StoreConfig};
pub use coordinator::{Coordinator, ReconError, RunSummary};
pub use dns::{DnsError, DnsResolver, Resolve};
pub use headers::{extract_status, parse_header_block, ParsedHeaders};
pub use http::{create_http_client, ClientError};
pub use memory::{MemoryStore, MxRecord};
pub use partition::{
    assign, parse_units, partition, read_units, InputError, Partition, ResumePoint, Shard,
};
pub use prober::{Probe, Prober};
pub use sqlite::{SqliteConnector, SqliteStore};
pub use store::{ProgressStore, StoreConnector, StoreError};
pub use types::{
    default_variants, HeaderFields, HttpStatus, ProbeConfig, ProbeResult, Scheme, Unit, Variant,
};
pub use worker::{Worker, WorkerReport};

use std::time::Instant;
use tracing::warn;

/// Probes one variant of one unit with a throwaway client. Never fails: a
/// client that cannot be built is reported as an unreachable result.
pub async fn probe(unit: &Unit, variant: &Variant, config: &ProbeConfig) -> ProbeResult {
    let start = Instant::now();
    match Prober::new(config) {
        Ok(prober) => prober.probe_one(unit, variant).await,
        Err(e) => {
            warn!(rank = unit.rank, error = %e, "Could not build prober");
            ProbeResult::unreachable(unit, variant, start.elapsed())
        }
    }
}
