use crate::types::Unit;
use std::{
    collections::{BTreeSet, VecDeque},
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read input list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads the ranked list. Only the first (rank) and last (domain) fields of
/// each line are used; lines that do not yield both are skipped.
pub fn read_units(path: &Path) -> Result<Vec<Unit>, InputError> {
    let read_err = |source| InputError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let units = parse_units(BufReader::new(file)).map_err(read_err)?;
    info!(path = %path.display(), units = units.len(), "Read input list");
    Ok(units)
}

pub fn parse_units<R: BufRead>(reader: R) -> io::Result<Vec<Unit>> {
    let mut units = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(unit) => units.push(unit),
            None => warn!(line = idx + 1, content = line, "Skipping malformed input line"),
        }
    }
    Ok(units)
}

fn parse_line(line: &str) -> Option<Unit> {
    let (first, rest) = line.split_once(',')?;
    let domain = rest.rsplit(',').next()?.trim();
    let rank = first.trim().parse::<u64>().ok().filter(|&r| r >= 1)?;
    if domain.is_empty() {
        return None;
    }
    Some(Unit::new(rank, domain))
}

/// Where a previous run left off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePoint {
    /// Ranks below `lowest_unresolved` that still need work.
    pub missing: BTreeSet<u64>,
    pub lowest_unresolved: u64,
}

impl ResumePoint {
    pub fn fresh() -> Self {
        Self {
            missing: BTreeSet::new(),
            lowest_unresolved: 1,
        }
    }

    pub fn needs(&self, rank: u64) -> bool {
        rank >= self.lowest_unresolved || self.missing.contains(&rank)
    }
}

/// A bounded, ordered run of units owned by exactly one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shard {
    units: VecDeque<Unit>,
}

impl Shard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: Unit) {
        self.units.push_back(unit);
    }

    pub fn pop(&mut self) -> Option<Unit> {
        self.units.pop_front()
    }

    pub fn append(&mut self, other: Shard) {
        self.units.extend(other.units);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ranks(&self) -> Vec<u64> {
        self.units.iter().map(|u| u.rank).collect()
    }
}

impl FromIterator<Unit> for Shard {
    fn from_iter<I: IntoIterator<Item = Unit>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub shards: Vec<Shard>,
    /// Units left out because a previous run already covered them.
    pub excluded: usize,
}

impl Partition {
    pub fn queued(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }
}

/// Splits the units that still need work into shards of at most `capacity`,
/// preserving input order. The last shard may be short; no shard is empty
/// unless there is nothing to do at all, in which case there are no shards.
pub fn partition<I>(units: I, resume: &ResumePoint, capacity: usize) -> Partition
where
    I: IntoIterator<Item = Unit>,
{
    let capacity = capacity.max(1);
    let mut shards = Vec::new();
    let mut current = Shard::new();
    let mut excluded = 0;

    for unit in units {
        if !resume.needs(unit.rank) {
            debug!(rank = unit.rank, domain = %unit.domain, "Skipping unit from a previous run");
            excluded += 1;
            continue;
        }
        current.push(unit);
        if current.len() == capacity {
            shards.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        shards.push(current);
    }

    Partition { shards, excluded }
}

/// Caps the shard count at `workers`. Overflow shards are appended
/// round-robin onto the first `workers` shards.
pub fn assign(mut shards: Vec<Shard>, workers: usize) -> Vec<Shard> {
    let workers = workers.max(1);
    if shards.len() <= workers {
        return shards;
    }
    let overflow = shards.split_off(workers);
    for (idx, shard) in overflow.into_iter().enumerate() {
        shards[idx % workers].append(shard);
    }
    shards
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn units(ranks: std::ops::RangeInclusive<u64>) -> Vec<Unit> {
        ranks.map(|r| Unit::new(r, format!("site{}.com", r))).collect()
    }

    #[test]
    fn parses_first_and_last_fields() {
        let input = "1,google.com\n2,extra,field,youtube.com\n\n3 , facebook.com \r\n";
        let units = parse_units(Cursor::new(input)).unwrap();
        assert_eq!(
            units,
            vec![
                Unit::new(1, "google.com"),
                Unit::new(2, "youtube.com"),
                Unit::new(3, "facebook.com"),
            ]
        );
    }

    #[test]
    fn skips_malformed_lines() {
        let input = "rank,domain\n0,zero.com\nlonely\n4,\n5,ok.com\n";
        let units = parse_units(Cursor::new(input)).unwrap();
        assert_eq!(units, vec![Unit::new(5, "ok.com")]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_units(Path::new("/nonexistent/top-1m.csv")).unwrap_err();
        assert!(matches!(err, InputError::Read { .. }));
    }

    #[test]
    fn resume_heals_gaps_and_continues_past_high_water_mark() {
        let resume = ResumePoint {
            missing: [3, 7].into_iter().collect(),
            lowest_unresolved: 10,
        };
        let partition = partition(units(1..=12), &resume, 100);

        assert_eq!(partition.shards.len(), 1);
        assert_eq!(partition.shards[0].ranks(), vec![3, 7, 10, 11, 12]);
        assert_eq!(partition.excluded, 7);
    }

    #[test]
    fn shards_respect_capacity_and_order() {
        let partition = partition(units(1..=5), &ResumePoint::fresh(), 2);
        let ranks: Vec<Vec<u64>> = partition.shards.iter().map(Shard::ranks).collect();
        assert_eq!(ranks, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(partition.queued(), 5);
    }

    #[test]
    fn exact_multiple_leaves_no_empty_shard() {
        let parts = partition(units(1..=4), &ResumePoint::fresh(), 2);
        assert_eq!(parts.shards.len(), 2);
        assert!(parts.shards.iter().all(|s| s.len() == 2));

        let empty = partition(Vec::new(), &ResumePoint::fresh(), 2);
        assert!(empty.shards.is_empty());
    }

    #[test]
    fn assign_folds_overflow_round_robin() {
        let partition = partition(units(1..=7), &ResumePoint::fresh(), 1);
        let assigned = assign(partition.shards, 3);

        let ranks: Vec<Vec<u64>> = assigned.iter().map(Shard::ranks).collect();
        assert_eq!(ranks, vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]);
    }

    #[test]
    fn assign_keeps_shards_when_workers_suffice() {
        let partition = partition(units(1..=3), &ResumePoint::fresh(), 2);
        let assigned = assign(partition.shards.clone(), 4);
        assert_eq!(assigned, partition.shards);
    }

    #[test]
    fn shard_pops_in_order() {
        let mut shard: Shard = units(1..=3).into_iter().collect();
        assert_eq!(shard.pop().map(|u| u.rank), Some(1));
        assert_eq!(shard.pop().map(|u| u.rank), Some(2));
        assert_eq!(shard.len(), 1);
    }
}
