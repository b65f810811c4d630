use librecon::{
    Coordinator, HttpStatus, MemoryStore, ProbeResult, Probe, ProgressStore, ReconConfig,
    SqliteConnector, StoreConnector, Unit, Variant,
};
use std::{
    collections::BTreeSet,
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::{NamedTempFile, TempDir};

/// Counts calls and records which (rank, url) pairs were probed.
#[derive(Clone, Default)]
struct Tally {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(u64, String)>>>,
}

struct CountingProbe {
    tally: Tally,
    fail_rank: Option<u64>,
}

impl Probe for CountingProbe {
    async fn probe(&self, unit: &Unit, variant: &Variant) -> ProbeResult {
        self.tally.calls.fetch_add(1, Ordering::SeqCst);
        self.tally
            .seen
            .lock()
            .unwrap()
            .push((unit.rank, variant.url(&unit.domain)));

        let mut result = ProbeResult::unreachable(unit, variant, Duration::from_millis(1));
        if self.fail_rank != Some(unit.rank) {
            result.status = HttpStatus::Code(200);
            result.resolved_ip = Some("192.0.2.1".to_string());
            result.headers.insert("server", "test");
        }
        result
    }
}

fn units(n: u64) -> Vec<Unit> {
    (1..=n).map(|r| Unit::new(r, format!("site{}.com", r))).collect()
}

fn config(workers: usize, shard_capacity: usize) -> ReconConfig {
    ReconConfig {
        workers,
        shard_capacity,
        ..ReconConfig::default()
    }
}

fn sqlite(dir: &TempDir) -> SqliteConnector {
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    SqliteConnector::new(&url).unwrap()
}

#[test]
fn second_run_probes_nothing_already_recorded() {
    let dir = TempDir::new().unwrap();
    let config = config(4, 3);
    let tally = Tally::default();
    let make = || {
        Ok(CountingProbe {
            tally: tally.clone(),
            fail_rank: None,
        })
    };

    let first = Coordinator::new(&config, sqlite(&dir), make)
        .run_units(units(10))
        .unwrap();
    assert_eq!(first.totals.variants_probed, 40);
    assert_eq!(tally.calls.load(Ordering::SeqCst), 40);

    let second = Coordinator::new(&config, sqlite(&dir), make)
        .run_units(units(10))
        .unwrap();
    assert_eq!(second.totals.variants_probed, 0);
    assert_eq!(second.units_excluded, 10);
    assert_eq!(tally.calls.load(Ordering::SeqCst), 40);

    let seen = tally.seen.lock().unwrap();
    let distinct: BTreeSet<&(u64, String)> = seen.iter().collect();
    assert_eq!(distinct.len(), seen.len());
}

#[test]
fn gaps_left_by_an_interrupted_run_are_healed() {
    let dir = TempDir::new().unwrap();
    let config = ReconConfig {
        variants: vec![Variant::parse("http://").unwrap()],
        ..config(2, 4)
    };

    // A previous run that recorded ranks 1, 2, 4, 5, 6, 8 and 9.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut store = sqlite(&dir).connect().await.unwrap();
        for unit in units(9).iter().filter(|u| u.rank != 3 && u.rank != 7) {
            let mut result =
                ProbeResult::unreachable(unit, &config.variants[0], Duration::ZERO);
            result.status = HttpStatus::Code(200);
            store.persist(&result).await.unwrap();
        }
        assert_eq!(store.lowest_unresolved_rank().await.unwrap(), 10);
        let candidates: BTreeSet<u64> = (1..=12).collect();
        let missing: Vec<u64> = store
            .missing_ranks(1, &candidates)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(missing, vec![3, 7]);
    });

    let tally = Tally::default();
    let summary = Coordinator::new(&config, sqlite(&dir), || {
        Ok(CountingProbe {
            tally: tally.clone(),
            fail_rank: None,
        })
    })
    .run_units(units(12))
    .unwrap();

    let mut probed: Vec<u64> = tally.seen.lock().unwrap().iter().map(|(r, _)| *r).collect();
    probed.sort_unstable();
    assert_eq!(probed, vec![3, 7, 10, 11, 12]);
    assert_eq!(summary.units_excluded, 7);
    assert_eq!(summary.units_queued, 5);
}

#[test]
fn one_failing_unit_does_not_affect_its_neighbours() {
    let config = ReconConfig {
        variants: vec![Variant::parse("https://").unwrap()],
        ..config(1, 10)
    };
    let store = MemoryStore::new();
    let tally = Tally::default();

    let summary = Coordinator::new(&config, store.clone(), || {
        Ok(CountingProbe {
            tally: tally.clone(),
            fail_rank: Some(5),
        })
    })
    .run_units(vec![
        Unit::new(4, "four.com"),
        Unit::new(5, "five.com"),
        Unit::new(6, "six.com"),
    ])
    .unwrap();

    let stored: Vec<(u64, HttpStatus)> = store.results().iter().map(|r| (r.rank, r.status)).collect();
    assert_eq!(
        stored,
        vec![
            (4, HttpStatus::Code(200)),
            (5, HttpStatus::Unreachable),
            (6, HttpStatus::Code(200)),
        ]
    );
    assert_eq!(summary.totals.probe_failures, 1);
}

#[test]
fn fully_recorded_domain_never_reaches_the_prober() {
    let config = config(1, 10);
    let mut store = MemoryStore::new();
    let done = Unit::new(20, "done.com");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        for variant in &config.variants {
            store
                .persist(&ProbeResult::unreachable(&done, variant, Duration::ZERO))
                .await
                .unwrap();
        }
        assert!(store
            .domain_fully_processed(&done, config.variants.len())
            .await
            .unwrap());
    });

    // Rank 20 is complete, so the resume filter drops it before any worker
    // sees it; rank 21 is past the high-water mark.
    let tally = Tally::default();
    let summary = Coordinator::new(&config, store.clone(), || {
        Ok(CountingProbe {
            tally: tally.clone(),
            fail_rank: None,
        })
    })
    .run_units(vec![done.clone(), Unit::new(21, "fresh.com")])
    .unwrap();

    assert!(tally
        .seen
        .lock()
        .unwrap()
        .iter()
        .all(|(rank, _)| *rank == 21));
    assert_eq!(summary.units_excluded, 1);
    assert_eq!(summary.totals.variants_probed, 4);
}

#[test]
fn worker_skips_a_unit_completed_after_partitioning() {
    let config = config(1, 10);
    let store = MemoryStore::new();
    let unit = Unit::new(1, "raced.com");

    // Another writer completes rank 1 between partitioning and probing.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let report = rt.block_on(async {
        let mut writer = store.clone();
        for variant in &config.variants {
            writer
                .persist(&ProbeResult::unreachable(&unit, variant, Duration::ZERO))
                .await
                .unwrap();
        }
        let tally = Tally::default();
        let probe = CountingProbe {
            tally: tally.clone(),
            fail_rank: None,
        };
        let report = librecon::Worker::new(0, store.clone(), probe, &config.variants)
            .run(std::iter::once(unit.clone()).collect())
            .await;
        assert_eq!(tally.calls.load(Ordering::SeqCst), 0);
        report
    });

    assert_eq!(report.units_skipped, 1);
    assert_eq!(store.len(), 4);
}

#[test]
fn reads_the_input_list_from_disk() {
    let mut list = NamedTempFile::new().unwrap();
    writeln!(list, "1,alpha.com").unwrap();
    writeln!(list, "2,x,beta.com").unwrap();
    writeln!(list, "3,gamma.com").unwrap();

    let config = ReconConfig {
        input_list: list.path().to_path_buf(),
        variants: vec![Variant::parse("http://").unwrap()],
        ..config(2, 2)
    };
    let store = MemoryStore::new();
    let tally = Tally::default();

    let summary = Coordinator::new(&config, store.clone(), || {
        Ok(CountingProbe {
            tally: tally.clone(),
            fail_rank: None,
        })
    })
    .run()
    .unwrap();

    assert_eq!(summary.units_read, 3);
    assert_eq!(summary.shards, 2);
    let domains: Vec<String> = store.results().into_iter().map(|r| r.domain).collect();
    assert_eq!(domains, vec!["alpha.com", "beta.com", "gamma.com"]);
}
