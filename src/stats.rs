/// Per-node statistical digests and the rules for pooling them across a cluster.
///
/// A NodeSummary is computed either from a node's raw latency samples or read from the
/// `summary` file the harness wrote next to them.  Summary files store microseconds; values
/// are converted to milliseconds at parse time (division is linear in every pooled statistic,
/// so this is equivalent to the original after-the-fact conversion).
///
/// Pooling works on digests only, never on raw per-sample data:
///
/// - pooled mean is the arithmetic mean of the per-node means;
///
/// - pooled standard deviation is sqrt(mean of the per-node variances).  This is exact only
///   when every node contributed the same number of samples, which is not verified; the
///   formula is kept as-is for compatibility with existing result sets;
///
/// - the grand percentile is the MAXIMUM of the per-node percentiles - the worst observed
///   node - not a percentile recomputed over pooled samples.
///
/// An empty set of summaries cannot be pooled and is a hard error; callers pre-filter to
/// known experiment runs via the directory classifier.
use crate::runtree::node_dirs;
use crate::Series;

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use ustr::Ustr;

/// Statistical digest of one node's latency samples, in milliseconds.  `p9999` is None for
/// legacy four-line summary files, which predate the 99.99th percentile.

#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub mean: f64,
    pub stddev: f64,
    pub p95: f64,
    pub p9999: Option<f64>,
    pub source: Ustr,
}

/// Digest of one experiment run pooled across all its nodes.  `p9999_max` is present only
/// when every node carried the 99.99th percentile.

#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub mean: f64,
    pub stddev: f64,
    pub p95_max: f64,
    pub p9999_max: Option<f64>,
}

/// The value below which `p` percent of the samples fall, `values` sorted ascending, with
/// linear interpolation between adjacent samples.  An empty slice yields 0.0; the summary
/// constructors reject empty input before getting here.

pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len();
    if p <= 0.0 {
        return values[0];
    }
    if p >= 100.0 {
        return values[n - 1];
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return values[lower];
    }
    values[lower] + (values[upper] - values[lower]) * (rank - lower as f64)
}

/// Digest a set of raw latency values (ms).  The standard deviation is the population
/// deviation, matching how the original result sets were produced.

pub fn summarize_values(source: &str, values: &[f64]) -> Result<NodeSummary> {
    if values.is_empty() {
        bail!("No samples to summarize for {source}");
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(NodeSummary {
        mean,
        stddev: variance.sqrt(),
        p95: percentile(&sorted, 95.0),
        p9999: Some(percentile(&sorted, 99.99)),
        source: Ustr::from(source),
    })
}

/// Digest a normalized latency series.

pub fn summarize_series(source: &str, series: &Series) -> Result<NodeSummary> {
    let values = series.iter().map(|s| s.value).collect::<Vec<f64>>();
    summarize_values(source, &values)
}

/// Read a legacy `summary` file: line 1 is a header, then mean, standard deviation, 95th
/// percentile, and (newer files only) 99.99th percentile, one per line, in microseconds.
/// Both `key=value` and space-delimited `key value` lines occur; the value is the last
/// token either way.

pub fn read_summary_file(file_name: &str) -> Result<NodeSummary> {
    parse_summary(file_name, &std::fs::read_to_string(file_name)?)
}

fn parse_summary(source: &str, content: &str) -> Result<NodeSummary> {
    let lines = content.lines().collect::<Vec<&str>>();
    if lines.len() < 4 {
        bail!("Summary file {source} is truncated");
    }
    let mean = summary_value(source, lines[1])? / 1000.0;
    let stddev = summary_value(source, lines[2])? / 1000.0;
    let p95 = summary_value(source, lines[3])? / 1000.0;
    let p9999 = match lines.get(4) {
        Some(line) if !line.trim().is_empty() => Some(summary_value(source, line)? / 1000.0),
        _ => None,
    };
    Ok(NodeSummary {
        mean,
        stddev,
        p95,
        p9999,
        source: Ustr::from(source),
    })
}

fn summary_value(source: &str, line: &str) -> Result<f64> {
    let tail = line.rsplit('=').next().unwrap_or(line);
    let Some(token) = tail.split_whitespace().last() else {
        bail!("Empty summary line in {source}");
    };
    match token.parse::<f64>() {
        Ok(v) => Ok(v),
        Err(_) => bail!("Bad summary value {token} in {source}"),
    }
}

/// Collect the summary files of one experiment run, keyed by node name.  A node directory
/// without a summary file contributes nothing; a present but unreadable summary is an error.

pub fn read_experiment_summaries(dir_name: &str) -> Result<HashMap<Ustr, NodeSummary>> {
    let mut summaries = HashMap::new();
    for (name, path) in node_dirs(dir_name)? {
        let file_name = format!("{}/summary", path);
        if Path::new(&file_name).is_file() {
            summaries.insert(Ustr::from(&name), read_summary_file(&file_name)?);
        }
    }
    Ok(summaries)
}

/// Pool per-node digests into one experiment digest.  The node count divides each statistic
/// exactly once.

pub fn pool_summaries(summaries: &HashMap<Ustr, NodeSummary>) -> Result<ExperimentSummary> {
    if summaries.is_empty() {
        bail!("Cannot pool an empty set of node summaries");
    }
    let n = summaries.len() as f64;
    let mut mean_acc = 0.0;
    let mut variance_acc = 0.0;
    let mut p95_max = 0.0f64;
    let mut p9999_max: Option<f64> = Some(0.0);
    for summary in summaries.values() {
        mean_acc += summary.mean;
        variance_acc += summary.stddev * summary.stddev;
        p95_max = p95_max.max(summary.p95);
        // The grand 99.99th is only meaningful if every node reported one.
        p9999_max = match (p9999_max, summary.p9999) {
            (Some(acc), Some(p)) => Some(acc.max(p)),
            _ => None,
        };
    }
    Ok(ExperimentSummary {
        mean: mean_acc / n,
        stddev: (variance_acc / n).sqrt(),
        p95_max,
        p9999_max,
    })
}

/// Digest the pooled raw samples of a whole run: every node's raw-latency-data concatenated.
/// Unlike pooling, this sees the individual samples, so the percentiles are true pooled
/// percentiles.

pub fn summarize_experiment_raw(dir_name: &str) -> Result<NodeSummary> {
    let mut all = vec![];
    for (_, path) in node_dirs(dir_name)? {
        let file_name = format!("{}/raw-latency-data", path);
        if Path::new(&file_name).is_file() {
            all.extend(crate::rawfile::read_raw_values(&file_name)?);
        }
    }
    summarize_values(dir_name, &all)
}

#[cfg(test)]
fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// This tests:
//  - linear interpolation between adjacent sorted samples, and the range clamps

#[test]
fn test_percentile() {
    let vs = [1.0, 2.0, 3.0, 4.0];
    assert!(percentile(&vs, 0.0) == 1.0);
    assert!(percentile(&vs, 100.0) == 4.0);
    assert!(close(percentile(&vs, 50.0), 2.5));
    assert!(close(percentile(&vs, 95.0), 3.85));
    assert!(percentile(&[], 95.0) == 0.0);
}

// This tests:
//  - mean, population standard deviation, and percentiles of a raw digest
//  - the empty-input error

#[test]
fn test_summarize_values() {
    let s = summarize_values("node-x", &[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert!(close(s.mean, 2.5));
    assert!(close(s.stddev, 1.25f64.sqrt()));
    assert!(close(s.p95, 3.85));
    assert!(s.p9999.is_some());
    assert!(s.source == "node-x");

    assert!(summarize_values("node-x", &[]).is_err());

    let series = vec![
        crate::Sample { time: 0.0, value: 1.0 },
        crate::Sample { time: 1.0, value: 3.0 },
    ];
    let s = summarize_series("node-x", &series).unwrap();
    assert!(close(s.mean, 2.0));
}

// This tests:
//  - both legacy line forms, the microsecond conversion, and the optional fifth line

#[test]
fn test_parse_summary() {
    let s = parse_summary(
        "s",
        "summary of results\nmean=2000\nstddev=2000\n95th=3000\n9999th=4000\n",
    )
    .unwrap();
    assert!(close(s.mean, 2.0));
    assert!(close(s.stddev, 2.0));
    assert!(close(s.p95, 3.0));
    assert!(s.p9999 == Some(4.0));

    let s = parse_summary("s", "summary of results\nmean 4000\nstddev 4000\n95th 5000\n").unwrap();
    assert!(close(s.mean, 4.0));
    assert!(s.p9999.is_none());

    assert!(parse_summary("s", "too\nshort\n").is_err());
    assert!(parse_summary("s", "h\nmean=x\nstddev=1\n95th=2\n").is_err());
}

// This tests:
//  - pooled stddev is sqrt of the mean of the per-node variances
//  - the grand percentile is the worst node, not a recomputed percentile

#[test]
fn test_pool_summaries() {
    let mut summaries = HashMap::new();
    for (name, stddev, p95) in [("a", 2.0, 10.0), ("b", 4.0, 25.0), ("c", 3.0, 18.0)] {
        summaries.insert(
            Ustr::from(name),
            NodeSummary {
                mean: 2.0,
                stddev,
                p95,
                p9999: Some(p95 * 2.0),
                source: Ustr::from(name),
            },
        );
    }
    let pooled = pool_summaries(&summaries).unwrap();
    assert!(close(pooled.mean, 2.0));
    // sqrt((4 + 16 + 9) / 3)
    assert!(close(pooled.stddev, (29.0f64 / 3.0).sqrt()));
    assert!(pooled.p95_max == 25.0);
    assert!(pooled.p9999_max == Some(50.0));

    // Two equal-weight nodes with stddevs 2 and 4 pool to sqrt(10).
    summaries.retain(|_, s| s.source != "c");
    let pooled = pool_summaries(&summaries).unwrap();
    assert!(close(pooled.stddev, 10.0f64.sqrt()));

    // One node without a 99.99th blanks the grand value.
    summaries.get_mut(&Ustr::from("a")).unwrap().p9999 = None;
    assert!(pool_summaries(&summaries).unwrap().p9999_max.is_none());

    assert!(pool_summaries(&HashMap::new()).is_err());
}

// This tests:
//  - the run-level summary collection against the whitebox tree

#[test]
fn test_read_experiment_summaries() {
    let run = "tests/whitebox-tree/exp/MMTB-1w19c200ups1000ts60000x";
    let summaries = read_experiment_summaries(run).unwrap();
    // node-3 has no summary file.
    assert!(summaries.len() == 2);
    let s1 = &summaries[&Ustr::from("node-1")];
    assert!(close(s1.mean, 2.0) && s1.p9999 == Some(4.0));
    let s2 = &summaries[&Ustr::from("node-2")];
    assert!(close(s2.mean, 4.0) && s2.p9999.is_none());

    let pooled = pool_summaries(&summaries).unwrap();
    assert!(close(pooled.mean, 3.0));
    assert!(close(pooled.stddev, 10.0f64.sqrt()));
    assert!(close(pooled.p95_max, 5.0));
    assert!(pooled.p9999_max.is_none());
}

// This tests:
//  - raw pooling concatenates every node's samples before digesting

#[test]
fn test_summarize_experiment_raw() {
    let run = "tests/whitebox-tree/exp/MMTB-1w19c200ups1000ts60000x";
    let s = summarize_experiment_raw(run).unwrap();
    // node-1 contributes 1,2,3,4 ms and node-2 contributes 2,4 ms.
    assert!(close(s.mean, 16.0 / 6.0));
}
