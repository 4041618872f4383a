/// Parser for the tab-delimited JMX metric logs.
///
/// The harness samples JVM metrics over JMX while a run is in progress and appends one line
/// per reading to `<jvm>-<node>-<type>.log`:
///
/// ```text
/// dotted.metric.name <TAB> value <TAB> timestamp_ms
/// ```
///
/// The dotted name is long and mostly constant; the lookup key is its last `key_depth`
/// dot-separated segments.  Depth 1 suffices for most logs, but the per-collector garbage
/// collection counters need depth 2 to keep the collectors apart (`PSScavenge.CollectionCount`
/// vs `PSMarkSweep.CollectionCount`).
///
/// Appending to these logs is not atomic with respect to reading them, so a partly-written
/// trailing record is likely; corrupted lines are dropped silently and only counted.
use crate::{KeyedLog, Sample};

use anyhow::Result;
use ustr::Ustr;

/// Well-known metric keys at depth 1.

pub const HEAP_USED: &str = "HeapMemoryUsage_used";
pub const HEAP_INIT: &str = "HeapMemoryUsage_init";
pub const HEAP_MAX: &str = "HeapMemoryUsage_max";
pub const HEAP_COMMITTED: &str = "HeapMemoryUsage_committed";

pub const CPU_SYSTEM_LOAD_AVERAGE: &str = "SystemLoadAverage";
pub const CPU_SYSTEM_LOAD: &str = "SystemCpuLoad";
pub const CPU_PROCESS_LOAD: &str = "ProcessCpuLoad";

pub const ZK_MAX_LATENCY: &str = "MaxRequestLatency";
pub const ZK_PACKETS_RECEIVED: &str = "PacketsReceived";
pub const ZK_PACKETS_SENT: &str = "PacketsSent";

/// Key suffixes of the cumulative garbage collection counters; the full depth-2 key carries
/// the collector name in its first segment.

pub const GC_COLLECTION_COUNT: &str = "CollectionCount";
pub const GC_COLLECTION_TIME: &str = "CollectionTime";

/// Log file type tags used in the file name convention.

pub const LOG_TYPE_MEMORY: &str = "mem";
pub const LOG_TYPE_CPU: &str = "cpu";
pub const LOG_TYPE_GC: &str = "gc";
pub const LOG_TYPE_GENERAL: &str = "general";

/// The harness names a metric log `<jvm>-<node>-<type>.log`, eg `kafka-c2-mem.log`.

pub fn log_file_name(jvm: &str, node: &str, log_type: &str) -> String {
    format!("{}-{}-{}.log", jvm, node, log_type)
}

/// Parse the contents of a metric log into a KeyedLog.  Series are created lazily on the
/// first occurrence of a key and appended to in file order.  `keys`, if nonempty, restricts
/// the result to the named keys.  Returns the log and the number of discarded lines.

pub fn parse_keyed_log(content: &str, key_depth: usize, keys: &[&str]) -> (KeyedLog, usize) {
    let mut data = KeyedLog::new();
    let mut discarded = 0usize;
    for line in content.lines() {
        let parts = line.split('\t').collect::<Vec<&str>>();
        if parts.len() < 3 {
            discarded += 1;
            continue;
        }
        let segments = parts[0].split('.').collect::<Vec<&str>>();
        let depth = key_depth.max(1).min(segments.len());
        let key = segments[segments.len() - depth..].join(".");
        if !keys.is_empty() && !keys.contains(&key.as_str()) {
            continue;
        }
        let (value, timestamp) = match (parts[1].parse::<f64>(), parts[2].parse::<i64>()) {
            (Ok(v), Ok(t)) => (v, t),
            _ => {
                discarded += 1;
                continue;
            }
        };
        data.entry(Ustr::from(&key)).or_insert_with(Vec::new).push(Sample {
            time: timestamp as f64,
            value,
        });
    }
    (data, discarded)
}

/// Read and parse a metric log file.  Returns an error only for I/O failures; corrupted
/// records are dropped and counted.

pub fn read_keyed_log(file_name: &str, key_depth: usize, keys: &[&str]) -> Result<(KeyedLog, usize)> {
    Ok(parse_keyed_log(
        &std::fs::read_to_string(file_name)?,
        key_depth,
        keys,
    ))
}

// This tests:
//  - keying by the last segment, lazy series creation, file order preserved

#[test]
fn test_keyed_log_depth1() {
    let content = "java.lang.Memory.HeapMemoryUsage_used\t1048576\t1000\n\
                   java.lang.Memory.HeapMemoryUsage_used\t2097152\t2000\n\
                   java.lang.os.ProcessCpuLoad\t0.5\t1000\n";
    let (data, discarded) = parse_keyed_log(content, 1, &[]);
    assert!(discarded == 0);
    assert!(data.len() == 2);
    let heap = &data[&Ustr::from(HEAP_USED)];
    assert!(heap.len() == 2);
    assert!(heap[0].time == 1000.0 && heap[0].value == 1048576.0);
    assert!(heap[1].time == 2000.0 && heap[1].value == 2097152.0);
    assert!(data[&Ustr::from(CPU_PROCESS_LOAD)][0].value == 0.5);
}

// This tests:
//  - depth 2 keeps per-collector counters apart

#[test]
fn test_keyed_log_depth2() {
    let content = "java.lang.GarbageCollector.PSScavenge.CollectionCount\t5\t1000\n\
                   java.lang.GarbageCollector.PSMarkSweep.CollectionCount\t1\t1000\n";
    let (data, _) = parse_keyed_log(content, 2, &[]);
    assert!(data.len() == 2);
    assert!(data.contains_key(&Ustr::from("PSScavenge.CollectionCount")));
    assert!(data.contains_key(&Ustr::from("PSMarkSweep.CollectionCount")));
}

// This tests:
//  - the key filter, and that corrupted lines are dropped and counted

#[test]
fn test_keyed_log_filter_and_discard() {
    let content = "a.b.KeepMe\t1.5\t1000\n\
                   a.b.DropMe\t2.5\t1000\n\
                   a.b.KeepMe\t2.5\n\
                   a.b.KeepMe\tnotanumber\t3000\n\
                   a.b.KeepMe\t3.5\t40";
    let (data, discarded) = parse_keyed_log(content, 1, &["KeepMe"]);
    assert!(discarded == 2);
    assert!(data.len() == 1);
    let s = &data[&Ustr::from("KeepMe")];
    assert!(s.len() == 2);
    assert!(s[1].time == 40.0 && s[1].value == 3.5);
}
