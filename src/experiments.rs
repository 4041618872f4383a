/// Recognizer for encoded experiment-run directory names.
///
/// The harness names each run directory after its workload parameters.  Two forms exist,
/// mutually exclusive by structure:
///
///   MMTB-<w>w<c>c<ups>ups<ts>ts<x>x
///     single-table workload: writers, readers, write rate, table size, duration (ms)
///
///   MultiMMTB-<mpw>mpw<mpr>mpr<m>maps<ups>ups<ts>ts<x>x
///     multi-table workload: maps per writer, maps per reader, total maps, updates per
///     second, table size, duration (ms)
///
/// Matching is anchored over the entire name.  A results tree holds plenty of directories
/// that are not runs (`logs`, `jmx`, `nmon`, ...); names matching neither form are simply
/// not experiments, which is not an error.
use anyhow::{bail, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

const SINGLE_TABLE_PATTERN: &str = r"^MMTB-(\d+)w(\d+)c(\d+)ups(\d+)ts(\d+)x$";
const MULTI_TABLE_PATTERN: &str = r"^MultiMMTB-(\d+)mpw(\d+)mpr(\d+)maps(\d+)ups(\d+)ts(\d+)x$";

/// The workload parameters encoded in a run name.  The fields are as the pattern extracted
/// them; no bounds are checked beyond what the pattern enforces structurally.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExperimentDescriptor {
    SingleTable {
        writers: u32,
        readers: u32,
        write_rate: u32,
        table_size: u32,
        duration_ms: u64,
    },
    MultiTable {
        maps_per_writer: u32,
        maps_per_reader: u32,
        maps: u32,
        updates_per_second: u32,
        table_size: u32,
        duration_ms: u64,
    },
}

impl ExperimentDescriptor {
    /// The total update rate of the run: the write rate itself for a single-table workload,
    /// updates per second across all maps for a multi-table one.

    pub fn total_update_rate(&self) -> u64 {
        match self {
            ExperimentDescriptor::SingleTable { write_rate, .. } => *write_rate as u64,
            ExperimentDescriptor::MultiTable {
                updates_per_second,
                maps,
                ..
            } => *updates_per_second as u64 * *maps as u64,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ExperimentDescriptor::SingleTable { duration_ms, .. } => *duration_ms,
            ExperimentDescriptor::MultiTable { duration_ms, .. } => *duration_ms,
        }
    }
}

/// Classify one directory name.  None means the name does not encode a recognized run.

pub fn classify_run_name(name: &str) -> Option<ExperimentDescriptor> {
    let single = Regex::new(SINGLE_TABLE_PATTERN).unwrap();
    let multi = Regex::new(MULTI_TABLE_PATTERN).unwrap();
    classify(&single, &multi, name)
}

fn classify(single: &Regex, multi: &Regex, name: &str) -> Option<ExperimentDescriptor> {
    if let Some(caps) = single.captures(name) {
        return Some(ExperimentDescriptor::SingleTable {
            writers: group_u32(&caps, 1)?,
            readers: group_u32(&caps, 2)?,
            write_rate: group_u32(&caps, 3)?,
            table_size: group_u32(&caps, 4)?,
            duration_ms: group_u64(&caps, 5)?,
        });
    }
    if let Some(caps) = multi.captures(name) {
        return Some(ExperimentDescriptor::MultiTable {
            maps_per_writer: group_u32(&caps, 1)?,
            maps_per_reader: group_u32(&caps, 2)?,
            maps: group_u32(&caps, 3)?,
            updates_per_second: group_u32(&caps, 4)?,
            table_size: group_u32(&caps, 5)?,
            duration_ms: group_u64(&caps, 6)?,
        });
    }
    None
}

// A \d+ group can still overflow the field type; such a name is treated as not a run.

fn group_u32(caps: &regex::Captures, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse::<u32>().ok()
}

fn group_u64(caps: &regex::Captures, i: usize) -> Option<u64> {
    caps.get(i)?.as_str().parse::<u64>().ok()
}

/// Classify every subdirectory of a results directory, returning name -> descriptor for the
/// recognized runs and silently excluding everything else.

pub fn list_experiments(dir_name: &str) -> Result<HashMap<String, ExperimentDescriptor>> {
    let p = Path::new(dir_name);
    if !p.is_dir() {
        bail!("Not a viable results directory: {dir_name}");
    }
    let single = Regex::new(SINGLE_TABLE_PATTERN).unwrap();
    let multi = Regex::new(MULTI_TABLE_PATTERN).unwrap();
    let mut experiments = HashMap::new();
    for entry in p.read_dir()? {
        if entry.is_err() {
            continue;
        }
        let path = entry.unwrap().path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(descriptor) = classify(&single, &multi, name) {
            experiments.insert(name.to_string(), descriptor);
        }
    }
    Ok(experiments)
}

// This tests:
//  - both recognized forms extract the right typed fields

#[test]
fn test_classify_run_name() {
    let d = classify_run_name("MMTB-1w19c200ups1000ts60000x").unwrap();
    assert!(
        d == ExperimentDescriptor::SingleTable {
            writers: 1,
            readers: 19,
            write_rate: 200,
            table_size: 1000,
            duration_ms: 60000,
        }
    );
    assert!(d.total_update_rate() == 200);
    assert!(d.duration_ms() == 60000);

    let d = classify_run_name("MultiMMTB-5mpw5mpr1maps100ups1000ts30000x").unwrap();
    assert!(
        d == ExperimentDescriptor::MultiTable {
            maps_per_writer: 5,
            maps_per_reader: 5,
            maps: 1,
            updates_per_second: 100,
            table_size: 1000,
            duration_ms: 30000,
        }
    );
    assert!(d.total_update_rate() == 100);

    let d = classify_run_name("MultiMMTB-20mpw20mpr2000maps8ups1000ts2400x").unwrap();
    assert!(d.total_update_rate() == 16000);
}

// This tests:
//  - matching is anchored over the whole name, and non-runs are excluded

#[test]
fn test_classify_rejects() {
    assert!(classify_run_name("random-folder").is_none());
    assert!(classify_run_name("logs").is_none());
    assert!(classify_run_name("xMMTB-1w19c200ups1000ts60000x").is_none());
    assert!(classify_run_name("MMTB-1w19c200ups1000ts60000x-retry").is_none());
    assert!(classify_run_name("MMTB-1w19c200ups1000ts").is_none());
}

// This tests:
//  - the directory listing keeps exactly the recognized runs

#[test]
fn test_list_experiments() {
    let experiments = list_experiments("tests/whitebox-tree/exp").unwrap();
    assert!(experiments.len() == 2);
    assert!(experiments.contains_key("MMTB-1w19c200ups1000ts60000x"));
    assert!(experiments.contains_key("MultiMMTB-5mpw5mpr1maps100ups1000ts30000x"));

    assert!(list_experiments("tests/whitebox-tree/no-such").is_err());
}
