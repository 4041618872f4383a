/// A benchmark results tree is the output of one campaign of the distributed merged-map
/// benchmark: a set of *experiment runs*, each an encoded-name directory holding one
/// subdirectory per participating node, plus sibling directories of JMX metric logs and nmon
/// system-resource logs captured while the run was in progress.
///
/// The data in such a tree represent a set of *series*: time-ordered numeric samples for one
/// metric on one node.  Latency series come from per-node raw sample files, metric series from
/// tab-delimited JMX logs, and resource series from comma-delimited nmon logs.  This library
/// has as its fundamental task to reconstruct those series from the raw files and to reduce
/// them to per-node and per-experiment statistical digests.  That task breaks down into a
/// number of subtasks:
///
/// - Parse the fixed-format sample, metadata, and metric files, tolerating the partial
///   artifacts that long-running multi-node experiments leave behind (truncated trailing
///   lines, nodes that crashed before writing every file).
///
/// - Normalize per-node latency samples to a common "seconds since experiment start" axis,
///   from per-sample timestamps when they were recorded and by interpolation between the
///   benchmark start/end marks when they were not.
///
/// - Pool per-node digests into one experiment-level digest.
///
/// - Recognize experiment runs by their encoded directory names and extract their workload
///   parameters.
///
/// - Derive discrete event series (GC runs, packets handled) from cumulative counters.
///
/// There is an important invariant on all parsed series:
///
/// - samples appear in the order they were captured; source files are time-ordered and no
///   resort is ever performed.
mod deltas;
mod experiments;
mod keylog;
mod nmonlog;
mod overlay;
mod rawfile;
mod runtree;
mod stats;

use std::collections::HashMap;
use ustr::Ustr;

/// A single observation: a numeric value and the time it was captured.  The time is absolute
/// epoch milliseconds for JMX metric series, absolute epoch seconds for nmon resource series,
/// and a relative offset in seconds since experiment start for normalized latency series; each
/// producer documents which applies.  Samples are immutable once parsed.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

/// A time-ordered sequence of samples for one metric on one node.  Insertion order is
/// chronological order from the source file.

pub type Series = Vec<Sample>;

/// A mapping from metric key to series, produced by parsing one delimited metrics file.  Keys
/// are the last one or two dot-separated components of the raw metric name and repeat across
/// many files, hence Ustr.

pub type KeyedLog = HashMap<Ustr, Series>;

// Read a raw integer-per-line sample file, skipping the header line and scaling each value by
// 1/1000.

pub use rawfile::parse_raw_values;
pub use rawfile::read_raw_values;

// Read a key=value metadata file into a string-to-string map, skipping malformed lines.

pub use rawfile::parse_key_values;
pub use rawfile::read_key_values;

// Parse a tab-delimited JMX metric log into a KeyedLog, with configurable key depth and an
// optional key filter.

pub use keylog::parse_keyed_log;
pub use keylog::read_keyed_log;

// Well-known JMX metric keys and the <jvm>-<node>-<type>.log file name convention.

pub use keylog::log_file_name;
pub use keylog::CPU_PROCESS_LOAD;
pub use keylog::CPU_SYSTEM_LOAD;
pub use keylog::CPU_SYSTEM_LOAD_AVERAGE;
pub use keylog::GC_COLLECTION_COUNT;
pub use keylog::GC_COLLECTION_TIME;
pub use keylog::HEAP_COMMITTED;
pub use keylog::HEAP_INIT;
pub use keylog::HEAP_MAX;
pub use keylog::HEAP_USED;
pub use keylog::LOG_TYPE_CPU;
pub use keylog::LOG_TYPE_GC;
pub use keylog::LOG_TYPE_GENERAL;
pub use keylog::LOG_TYPE_MEMORY;
pub use keylog::ZK_MAX_LATENCY;
pub use keylog::ZK_PACKETS_RECEIVED;
pub use keylog::ZK_PACKETS_SENT;

// Parse an nmon resource log into typed per-category sections, pairing every value row with
// the current snapshot timestamp at parse time.

pub use nmonlog::parse_resource_log;
pub use nmonlog::read_resource_directory;
pub use nmonlog::read_resource_log;
pub use nmonlog::CpuCoreSection;
pub use nmonlog::Direction;
pub use nmonlog::DiskColumn;
pub use nmonlog::MemorySection;
pub use nmonlog::NetColumn;
pub use nmonlog::ResourceLog;
pub use nmonlog::ResourceSample;

// Load the normalized latency series for every node of one experiment run.

pub use runtree::load_experiment_series;
pub use runtree::load_node_series;
pub use runtree::ExperimentSeries;

// Per-node statistical digests and the cross-node pooling rules.

pub use stats::percentile;
pub use stats::pool_summaries;
pub use stats::read_experiment_summaries;
pub use stats::read_summary_file;
pub use stats::summarize_experiment_raw;
pub use stats::summarize_series;
pub use stats::summarize_values;
pub use stats::ExperimentSummary;
pub use stats::NodeSummary;

// Recognize experiment runs by their encoded directory names.

pub use experiments::classify_run_name;
pub use experiments::list_experiments;
pub use experiments::ExperimentDescriptor;

// Convert a cumulative counter series into discrete per-interval increments.

pub use deltas::discrete_deltas;

// Explicit overlay configuration and the entry point that assembles chart-ready series.

pub use overlay::collect_overlays;
pub use overlay::read_overlay_config;
pub use overlay::LabeledSeries;
pub use overlay::OverlayConfig;
pub use overlay::Overlays;
