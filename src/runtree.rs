/// Loaders for the per-node latency data of one experiment run.
///
/// An experiment run is a directory holding one subdirectory per participating node.  Each
/// node directory may contain:
///
///   raw-latency-data     one latency sample per line (microseconds, header line first)
///   raw-timestamp-data   the capture time of each sample, positionally aligned (milliseconds)
///   timestamps           key=value metadata, including startbenchmark/endbenchmark (epoch ms)
///
/// The loader normalizes each node's samples to (seconds since experiment start, latency ms).
/// Two joining strategies exist:
///
/// - direct: when raw-timestamp-data is present and readable, offset_i = t_i - t_0;
///
/// - interpolation: otherwise, read the benchmark start/end marks and assume the samples are
///   evenly spaced between them.  This is the fallback for older data without per-sample
///   timestamps.
///
/// Nodes crash and lose artifacts in long-running distributed experiments; a node without a
/// usable latency file and timing source contributes nothing and is skipped, which is not an
/// error for the run as a whole.
use crate::rawfile::{read_key_values, read_raw_values};
use crate::{Sample, Series};

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use ustr::Ustr;

/// The normalized latency series of every node that could be loaded from one run, and the
/// earliest benchmark start time (epoch ms) seen among them; 0 when no node loaded.

#[derive(Debug)]
pub struct ExperimentSeries {
    pub start_ms: f64,
    pub nodes: HashMap<Ustr, Series>,
}

/// Load one node directory.  Returns Ok(None) when the node is skipped for lack of a usable
/// latency file or timing source; the second element of the pair is the node's start time in
/// epoch ms.

pub fn load_node_series(node_dir: &str) -> Result<Option<(Series, f64)>> {
    let latency_file = format!("{}/raw-latency-data", node_dir);
    if !Path::new(&latency_file).is_file() {
        return Ok(None);
    }
    let values = read_raw_values(&latency_file)?;
    if values.is_empty() {
        // Either truncated beyond use or genuinely empty.
        return Ok(None);
    }

    // The metadata file is consulted for the start mark in both modes.
    let meta_file = format!("{}/timestamps", node_dir);
    let meta = if Path::new(&meta_file).is_file() {
        read_key_values(&meta_file)?
    } else {
        HashMap::new()
    };
    let start = meta.get("startbenchmark").and_then(|s| s.parse::<f64>().ok());
    let end = meta.get("endbenchmark").and_then(|s| s.parse::<f64>().ok());

    // Direct mode.  The raw timestamps are epoch ms scaled to seconds by the reader, so the
    // offsets come out in seconds directly.
    let timestamp_file = format!("{}/raw-timestamp-data", node_dir);
    if Path::new(&timestamp_file).is_file() {
        let times = read_raw_values(&timestamp_file)?;
        if !times.is_empty() {
            let t0 = times[0];
            let series = times
                .iter()
                .zip(values.iter())
                .map(|(&t, &v)| Sample { time: t - t0, value: v })
                .collect::<Series>();
            let start_ms = start.unwrap_or(t0 * 1000.0);
            return Ok(Some((series, start_ms)));
        }
    }

    // Interpolation mode: N samples evenly spaced over [startbenchmark, endbenchmark].
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(None);
    };
    let delta = (end - start) / values.len() as f64;
    let series = values
        .iter()
        .enumerate()
        .map(|(i, &v)| Sample {
            time: delta * i as f64 / 1000.0,
            value: v,
        })
        .collect::<Series>();
    Ok(Some((series, start)))
}

/// Load the latency series of every node subdirectory of one run.  Nodes that cannot
/// contribute are skipped silently.

pub fn load_experiment_series(dir_name: &str) -> Result<ExperimentSeries> {
    let mut nodes = HashMap::new();
    let mut start_ms = f64::INFINITY;
    for (name, path) in node_dirs(dir_name)? {
        if let Some((series, start)) = load_node_series(&path)? {
            start_ms = start_ms.min(start);
            nodes.insert(Ustr::from(&name), series);
        }
    }
    if nodes.is_empty() {
        start_ms = 0.0;
    }
    Ok(ExperimentSeries { start_ms, nodes })
}

/// List the node subdirectories of a run directory as (name, path) pairs.

pub(crate) fn node_dirs(dir_name: &str) -> Result<Vec<(String, String)>> {
    let p = Path::new(dir_name);
    if !p.is_dir() {
        bail!("Not a viable experiment directory: {dir_name}");
    }
    let mut dirs = vec![];
    for entry in p.read_dir()? {
        if entry.is_err() {
            // Bad directory entries are ignored, though these would probably be I/O errors.
            continue;
        }
        let path = entry.unwrap().path();
        if !path.is_dir() {
            continue;
        }
        let (Some(name), Some(path)) = (
            path.file_name().and_then(|s| s.to_str()).map(str::to_string),
            path.to_str().map(str::to_string),
        ) else {
            // Non-UTF8 names will never match a node we care about.
            continue;
        };
        dirs.push((name, path));
    }
    dirs.sort();
    Ok(dirs)
}

// Whitebox fixtures live in tests/whitebox-tree; node-1 carries per-sample timestamps
// (direct mode), node-2 only the start/end marks (interpolation mode), node-3 nothing.

#[cfg(test)]
const RUN_A: &str = "tests/whitebox-tree/exp/MMTB-1w19c200ups1000ts60000x";

// This tests:
//  - direct mode offsets are t_i - t_0 in seconds, values in ms

#[test]
fn test_direct_mode() {
    let (series, start_ms) = load_node_series(&format!("{}/node-1", RUN_A))
        .unwrap()
        .unwrap();
    assert!(start_ms == 1000.0);
    assert!(series.len() == 4);
    assert!(series[0] == Sample { time: 0.0, value: 1.0 });
    assert!(series[1] == Sample { time: 0.5, value: 2.0 });
    assert!(series[3] == Sample { time: 1.5, value: 4.0 });
}

// This tests:
//  - interpolation mode spaces N samples evenly over the benchmark window

#[test]
fn test_interpolation_mode() {
    let (series, start_ms) = load_node_series(&format!("{}/node-2", RUN_A))
        .unwrap()
        .unwrap();
    assert!(start_ms == 1000.0);
    // delta = (3000 - 1000) / 2 = 1000 ms per sample.
    assert!(series.len() == 2);
    assert!(series[0] == Sample { time: 0.0, value: 2.0 });
    assert!(series[1] == Sample { time: 1.0, value: 4.0 });
}

// This tests:
//  - a node without artifacts is skipped, not an error

#[test]
fn test_skipped_node() {
    assert!(load_node_series(&format!("{}/node-3", RUN_A)).unwrap().is_none());
}

// This tests:
//  - the run-level loader collects exactly the loadable nodes

#[test]
fn test_load_experiment_series() {
    let exp = load_experiment_series(RUN_A).unwrap();
    assert!(exp.start_ms == 1000.0);
    assert!(exp.nodes.len() == 2);
    assert!(exp.nodes.contains_key(&Ustr::from("node-1")));
    assert!(exp.nodes.contains_key(&Ustr::from("node-2")));
}

#[test]
fn test_load_experiment_series_missing_dir() {
    assert!(load_experiment_series("tests/whitebox-tree/exp/no-such-run").is_err());
}
