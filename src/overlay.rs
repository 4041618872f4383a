/// Overlay configuration and the entry point that assembles chart-ready series.
///
/// The measurement side of the harness leaves three log families next to each experiment
/// run: per-JVM JMX metric logs, per-node nmon resource logs, and the latency data itself.
/// Which overlays end up on a chart is an explicit configuration structure - one recognized
/// option per overlay, plus the interface and device lists for the nmon-derived ones -
/// passed to `collect_overlays`, which loads whatever the configuration enables and returns
/// plain labeled series ready for a plotting layer.
///
/// Sources that are enabled but absent on disk are recorded in `Overlays::skipped` rather
/// than reported as errors; a crashed node leaves holes in every log family and the charts
/// should show what survived.
///
/// The configuration can also be read from a JSON file.  The input is human-edited, so the
/// file is decoded from a generic JSON value with explicit field checks rather than a
/// derived strongly-typed parser; field names starting with '#' are reserved for comments.
use crate::deltas::discrete_deltas;
use crate::keylog::{
    log_file_name, read_keyed_log, CPU_PROCESS_LOAD, CPU_SYSTEM_LOAD, CPU_SYSTEM_LOAD_AVERAGE,
    GC_COLLECTION_COUNT, GC_COLLECTION_TIME, HEAP_USED, LOG_TYPE_CPU, LOG_TYPE_GC,
    LOG_TYPE_GENERAL, LOG_TYPE_MEMORY, ZK_MAX_LATENCY, ZK_PACKETS_RECEIVED, ZK_PACKETS_SENT,
};
use crate::nmonlog::{read_resource_directory, Direction, ResourceSample};
use crate::{Sample, Series};

use anyhow::{bail, Result};
use itertools::Itertools;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Which overlays to assemble.  The default is everything off.

#[derive(Debug, Default, Clone)]
pub struct OverlayConfig {
    pub overlay_cpu: bool,
    pub overlay_memory: bool,
    pub overlay_gc: bool,
    pub overlay_gc_time: bool,
    pub overlay_max_latency: bool,
    pub overlay_packets: bool,
    pub overlay_network: bool,
    pub overlay_disk_rate: bool,
    pub overlay_disk_busy: bool,
    pub overlay_cpu_cores: bool,
    pub overlay_nmon_memory: bool,
    /// Interfaces drawn by the network overlay, eg "eth0".
    pub network_interfaces: Vec<String>,
    /// Block devices drawn by the disk overlays, eg "sda".
    pub disk_ids: Vec<String>,
}

/// One chart-ready series.  Times are seconds since the first sample of the source log;
/// values are in chart units (percent, MB, KB/s, events per interval).

#[derive(Debug)]
pub struct LabeledSeries {
    pub label: String,
    pub series: Series,
}

#[derive(Debug, Default)]
pub struct Overlays {
    pub cpu: Vec<LabeledSeries>,
    pub heap_used: Vec<LabeledSeries>,
    pub gc_events: Vec<LabeledSeries>,
    pub gc_time: Vec<LabeledSeries>,
    pub max_latency: Vec<LabeledSeries>,
    pub packets: Vec<LabeledSeries>,
    pub network: Vec<LabeledSeries>,
    pub disk_rate: Vec<LabeledSeries>,
    pub disk_busy: Vec<LabeledSeries>,
    pub cpu_cores: Vec<LabeledSeries>,
    pub nmon_memory: Vec<LabeledSeries>,
    /// Sources that were enabled but not found.
    pub skipped: Vec<String>,
}

/// Assemble every overlay the configuration enables.  `jvms` and `nodes` span the JMX log
/// files to consider (`<jvm>-<node>-<type>.log` under `jmx_dir`); the nmon logs are read per
/// file from `nmon_dir`.

pub fn collect_overlays(
    config: &OverlayConfig,
    jmx_dir: &str,
    nmon_dir: &str,
    jvms: &[&str],
    nodes: &[&str],
) -> Result<Overlays> {
    let mut overlays = Overlays::default();

    for jvm in jvms {
        for node in nodes {
            if config.overlay_cpu {
                collect_jmx(
                    &mut overlays.cpu,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_CPU,
                    1,
                    &|k| {
                        k == CPU_PROCESS_LOAD || k == CPU_SYSTEM_LOAD || k == CPU_SYSTEM_LOAD_AVERAGE
                    },
                    100.0,
                    false,
                )?;
            }
            if config.overlay_memory {
                collect_jmx(
                    &mut overlays.heap_used,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_MEMORY,
                    1,
                    &|k| k == HEAP_USED,
                    1.0 / (1024.0 * 1024.0),
                    false,
                )?;
            }
            if config.overlay_gc {
                collect_jmx(
                    &mut overlays.gc_events,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_GC,
                    2,
                    &|k| k.ends_with(GC_COLLECTION_COUNT),
                    1.0,
                    true,
                )?;
            }
            if config.overlay_gc_time {
                collect_jmx(
                    &mut overlays.gc_time,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_GC,
                    2,
                    &|k| k.ends_with(GC_COLLECTION_TIME),
                    1.0,
                    true,
                )?;
            }
            if config.overlay_max_latency {
                collect_jmx(
                    &mut overlays.max_latency,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_GENERAL,
                    1,
                    &|k| k == ZK_MAX_LATENCY,
                    1.0,
                    false,
                )?;
            }
            if config.overlay_packets {
                collect_jmx(
                    &mut overlays.packets,
                    &mut overlays.skipped,
                    jmx_dir,
                    jvm,
                    node,
                    LOG_TYPE_GENERAL,
                    1,
                    &|k| k == ZK_PACKETS_RECEIVED || k == ZK_PACKETS_SENT,
                    1.0,
                    true,
                )?;
            }
        }
    }

    let wants_nmon = config.overlay_network
        || config.overlay_disk_rate
        || config.overlay_disk_busy
        || config.overlay_cpu_cores
        || config.overlay_nmon_memory;
    if wants_nmon {
        if !Path::new(nmon_dir).is_dir() {
            overlays.skipped.push(nmon_dir.to_string());
        } else {
            collect_nmon(config, &mut overlays, nmon_dir)?;
        }
    }

    Ok(overlays)
}

// Load one JMX metric log, select the keys of interest, and emit one labeled series per
// key: times rebased to seconds since the earliest selected sample, values scaled, and
// cumulative counters differenced when requested.

fn collect_jmx(
    out: &mut Vec<LabeledSeries>,
    skipped: &mut Vec<String>,
    jmx_dir: &str,
    jvm: &str,
    node: &str,
    log_type: &str,
    key_depth: usize,
    select: &dyn Fn(&str) -> bool,
    scale: f64,
    differentiate: bool,
) -> Result<()> {
    let file_name = format!("{}/{}", jmx_dir, log_file_name(jvm, node, log_type));
    if !Path::new(&file_name).is_file() {
        skipped.push(file_name);
        return Ok(());
    }
    let (data, _) = read_keyed_log(&file_name, key_depth, &[])?;
    let keys = data
        .keys()
        .filter(|k| select(k.as_str()))
        .sorted()
        .collect::<Vec<_>>();
    let x0 = keys
        .iter()
        .filter_map(|k| data[*k].first())
        .map(|s| s.time)
        .fold(f64::INFINITY, f64::min);
    for key in keys {
        let deltas;
        let series = if differentiate {
            deltas = discrete_deltas(&data[key]);
            &deltas
        } else {
            &data[key]
        };
        let rebased = series
            .iter()
            .map(|s| Sample {
                time: (s.time - x0) / 1000.0,
                value: s.value * scale,
            })
            .collect::<Series>();
        out.push(LabeledSeries {
            label: format!("{} {} {}", jvm, node, key),
            series: rebased,
        });
    }
    Ok(())
}

fn collect_nmon(config: &OverlayConfig, overlays: &mut Overlays, nmon_dir: &str) -> Result<()> {
    let logs = read_resource_directory(nmon_dir)?;
    for name in logs.keys().sorted() {
        let log = &logs[name];
        let x0 = log.timestamps.first().copied().unwrap_or(0.0);

        if config.overlay_network {
            for interface in &config.network_interfaces {
                let read = log.network_series(interface, Direction::Read);
                let write = log.network_series(interface, Direction::Write);
                if read.is_none() && write.is_none() {
                    overlays.skipped.push(format!("{}: no interface {}", name, interface));
                    continue;
                }
                for (samples, tag) in [(read, "read"), (write, "write")] {
                    if let Some(samples) = samples {
                        overlays.network.push(LabeledSeries {
                            label: format!("{} {} {} [KB/s]", name, interface, tag),
                            series: rebase_resource(samples, x0),
                        });
                    }
                }
            }
        }

        if config.overlay_disk_rate {
            for device in &config.disk_ids {
                let read = log.disk_read_series(device);
                let write = log.disk_write_series(device);
                if read.is_none() && write.is_none() {
                    overlays.skipped.push(format!("{}: no device {}", name, device));
                    continue;
                }
                for (samples, tag) in [(read, "read"), (write, "write")] {
                    if let Some(samples) = samples {
                        overlays.disk_rate.push(LabeledSeries {
                            label: format!("{} {} {} [KB/s]", name, device, tag),
                            series: rebase_resource(samples, x0),
                        });
                    }
                }
            }
        }

        if config.overlay_disk_busy {
            for device in &config.disk_ids {
                match log.disk_busy_series(device) {
                    Some(samples) => overlays.disk_busy.push(LabeledSeries {
                        label: format!("{} {} busy [%]", name, device),
                        series: rebase_resource(samples, x0),
                    }),
                    None => overlays
                        .skipped
                        .push(format!("{}: no busy figures for {}", name, device)),
                }
            }
        }

        if config.overlay_cpu_cores {
            for core in &log.cpu_cores {
                // Busy = user + sys; a snapshot missing either figure is left out.
                let series = core
                    .user_pct
                    .iter()
                    .zip(core.sys_pct.iter())
                    .filter_map(|(u, s)| match (u.value, s.value) {
                        (Some(user), Some(sys)) => Some(Sample {
                            time: u.time - x0,
                            value: user + sys,
                        }),
                        _ => None,
                    })
                    .collect::<Series>();
                overlays.cpu_cores.push(LabeledSeries {
                    label: format!("{} cpu{} busy [%]", name, core.core),
                    series,
                });
            }
        }

        if config.overlay_nmon_memory {
            if let Some(memory) = &log.memory {
                let series = memory
                    .total_mb
                    .iter()
                    .zip(memory.free_mb.iter())
                    .filter_map(|(t, f)| match (t.value, f.value) {
                        (Some(total), Some(free)) => Some(Sample {
                            time: t.time - x0,
                            value: total - free,
                        }),
                        _ => None,
                    })
                    .collect::<Series>();
                overlays.nmon_memory.push(LabeledSeries {
                    label: format!("{} memory used [MB]", name),
                    series,
                });
            }
        }
    }
    Ok(())
}

// nmon times are already epoch seconds; gaps (explicit no-value samples) are simply left
// out of the chart series.

fn rebase_resource(samples: &[ResourceSample], x0: f64) -> Series {
    samples
        .iter()
        .filter_map(|s| {
            s.value.map(|value| Sample {
                time: s.time - x0,
                value,
            })
        })
        .collect()
}

/// Read an overlay configuration from a JSON file.  Unrecognized fields are ignored;
/// everything is optional and defaults to off/empty.

pub fn read_overlay_config(file_name: &str) -> Result<OverlayConfig> {
    let file = File::open(Path::new(file_name))?;
    let v = serde_json::from_reader(BufReader::new(file))?;
    let Value::Object(fields) = v else {
        bail!("Expected an object value");
    };
    let mut cfg = OverlayConfig::default();
    cfg.overlay_cpu = grab_bool_opt(&fields, "overlay_cpu")?.unwrap_or(false);
    cfg.overlay_memory = grab_bool_opt(&fields, "overlay_memory")?.unwrap_or(false);
    cfg.overlay_gc = grab_bool_opt(&fields, "overlay_gc")?.unwrap_or(false);
    cfg.overlay_gc_time = grab_bool_opt(&fields, "overlay_gc_time")?.unwrap_or(false);
    cfg.overlay_max_latency = grab_bool_opt(&fields, "overlay_max_latency")?.unwrap_or(false);
    cfg.overlay_packets = grab_bool_opt(&fields, "overlay_packets")?.unwrap_or(false);
    cfg.overlay_network = grab_bool_opt(&fields, "overlay_network")?.unwrap_or(false);
    cfg.overlay_disk_rate = grab_bool_opt(&fields, "overlay_disk_rate")?.unwrap_or(false);
    cfg.overlay_disk_busy = grab_bool_opt(&fields, "overlay_disk_busy")?.unwrap_or(false);
    cfg.overlay_cpu_cores = grab_bool_opt(&fields, "overlay_cpu_cores")?.unwrap_or(false);
    cfg.overlay_nmon_memory = grab_bool_opt(&fields, "overlay_nmon_memory")?.unwrap_or(false);
    cfg.network_interfaces = grab_strings_opt(&fields, "network_interfaces")?;
    cfg.disk_ids = grab_strings_opt(&fields, "disk_ids")?;
    Ok(cfg)
}

fn grab_bool_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<bool>> {
    if let Some(d) = fields.get(name) {
        if let Value::Bool(b) = d {
            Ok(Some(*b))
        } else {
            bail!("Field '{name}' must have a boolean value");
        }
    } else {
        Ok(None)
    }
}

fn grab_strings_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Vec<String>> {
    let mut result = vec![];
    if let Some(Value::Array(vals)) = fields.get(name) {
        for v in vals {
            if let Value::String(s) = v {
                result.push(s.to_string());
            } else {
                bail!("Field '{name}' must have string values");
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
fn find<'a>(series: &'a [LabeledSeries], label: &str) -> &'a LabeledSeries {
    series
        .iter()
        .find(|s| s.label == label)
        .unwrap_or_else(|| panic!("no series labeled {label}"))
}

// This tests:
//  - the whitebox configuration file, including defaults for absent fields

#[test]
fn test_read_overlay_config() {
    let cfg = read_overlay_config("tests/whitebox-tree/overlay-config.json").unwrap();
    assert!(cfg.overlay_cpu);
    assert!(cfg.overlay_memory);
    assert!(cfg.overlay_gc);
    assert!(!cfg.overlay_gc_time);
    assert!(!cfg.overlay_network);
    assert!(cfg.network_interfaces == vec!["eth0".to_string(), "eth2".to_string()]);
    assert!(cfg.disk_ids == vec!["sda".to_string()]);
}

// This tests:
//  - end-to-end collection over the whitebox jmx and nmon trees: scaling, rebasing,
//    counter differencing, and the skip records for sources that are not there

#[test]
fn test_collect_overlays() {
    let config = OverlayConfig {
        overlay_cpu: true,
        overlay_memory: true,
        overlay_gc: true,
        overlay_gc_time: true,
        overlay_max_latency: true,
        overlay_packets: true,
        overlay_network: true,
        overlay_disk_rate: true,
        overlay_disk_busy: true,
        overlay_cpu_cores: true,
        overlay_nmon_memory: true,
        network_interfaces: vec!["eth0".to_string()],
        disk_ids: vec!["sda".to_string()],
    };
    let overlays = collect_overlays(
        &config,
        "tests/whitebox-tree/jmx",
        "tests/whitebox-tree/nmon",
        &["kafka", "zoo"],
        &["c1", "c2"],
    )
    .unwrap();

    // CPU loads: three keys from kafka-c1-cpu.log, percentages, seconds since first sample.
    assert!(overlays.cpu.len() == 3);
    let process = find(&overlays.cpu, "kafka c1 ProcessCpuLoad");
    assert!(process.series == vec![
        Sample { time: 0.0, value: 50.0 },
        Sample { time: 1.0, value: 25.0 },
    ]);

    // Heap used, bytes to MB.
    let heap = find(&overlays.heap_used, "kafka c1 HeapMemoryUsage_used");
    assert!(heap.series == vec![
        Sample { time: 0.0, value: 1.0 },
        Sample { time: 2.0, value: 2.0 },
    ]);

    // GC counters differenced per collector; the no-advance step vanishes.
    let gc = find(&overlays.gc_events, "kafka c1 PSScavenge.CollectionCount");
    assert!(gc.series == vec![Sample { time: 2.0, value: 3.0 }]);
    let gc_time = find(&overlays.gc_time, "kafka c1 PSScavenge.CollectionTime");
    assert!(gc_time.series == vec![Sample { time: 2.0, value: 60.0 }]);

    // Zookeeper figures from the general log.
    let latency = find(&overlays.max_latency, "zoo c1 MaxRequestLatency");
    assert!(latency.series.len() == 2 && latency.series[1].value == 20.0);
    let received = find(&overlays.packets, "zoo c1 PacketsReceived");
    assert!(received.series == vec![Sample { time: 1.0, value: 50.0 }]);
    let sent = find(&overlays.packets, "zoo c1 PacketsSent");
    assert!(sent.series.is_empty());

    // nmon-derived overlays; the None sample leaves a gap, not a zero.
    let read = find(&overlays.network, "c1 eth0 read [KB/s]");
    assert!(read.series.len() == 2 && read.series[1].value == 11.0);
    let write = find(&overlays.network, "c1 eth0 write [KB/s]");
    assert!(write.series == vec![Sample { time: 0.0, value: 3.25 }]);
    assert!(find(&overlays.disk_rate, "c1 sda read [KB/s]").series[0].value == 100.0);
    assert!(find(&overlays.disk_busy, "c1 sda busy [%]").series[0].value == 12.5);
    let busy = find(&overlays.cpu_cores, "c1 cpu1 busy [%]");
    assert!(busy.series == vec![Sample { time: 0.0, value: 60.0 }]);
    let memory = find(&overlays.nmon_memory, "c1 memory used [MB]");
    assert!(memory.series.len() == 2 && memory.series[0].value == 8000.0);

    // Nothing was captured for c2; every enabled JMX overlay records the miss.
    assert!(overlays
        .skipped
        .iter()
        .any(|s| s.ends_with("kafka-c2-cpu.log")));
    assert!(overlays
        .skipped
        .iter()
        .any(|s| s.ends_with("zoo-c2-general.log")));
}
