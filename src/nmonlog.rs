/// Parser for comma-delimited nmon system-resource logs.
///
/// An nmon log is a tagged-record format: every line starts with a record-type tag.  `ZZZZ`
/// lines mark the wall-clock time of the next measurement snapshot; the first line bearing
/// any other recognized tag defines that section's column headers, and subsequent lines of
/// the same tag are value rows parsed against those headers.  Recognized sections:
///
///   NET        per-interface read/write rates, KB/s
///   DISKREAD   per-device read rate, KB/s
///   DISKWRITE  per-device write rate, KB/s
///   DISKBUSY   per-device busy percentage
///   MEM        memory figures, MB
///   CPUnnn     per-core user/sys/wait/idle percentages
///
/// Every value row is paired with the current snapshot timestamp as it is parsed, so a value
/// can never drift away from its capture time.  An empty field parses to an explicit
/// "no value", never to zero.
///
/// The capture hosts stamp `ZZZZ` lines with local wall-clock time (`HH:MM:SS,DD-MMM-YYYY`);
/// a fixed timezone correction is applied when converting to epoch seconds.
use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::path::Path;
use ustr::Ustr;

// The hosts that produced these logs ran on CEST wall-clock time.

const UTC_OFFSET_SECS: i64 = 7200;

/// One resource reading: the epoch time (seconds) of the snapshot it belongs to and the
/// value, or None when the field was empty or unreadable in the log.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub time: f64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One network column: readings for one interface in one direction.

#[derive(Debug)]
pub struct NetColumn {
    pub interface: Ustr,
    pub direction: Direction,
    pub samples: Vec<ResourceSample>,
}

/// One disk column: readings for one block device.

#[derive(Debug)]
pub struct DiskColumn {
    pub device: Ustr,
    pub samples: Vec<ResourceSample>,
}

/// The memory figures we retain from the MEM section, all in MB.

#[derive(Debug, Default)]
pub struct MemorySection {
    pub total_mb: Vec<ResourceSample>,
    pub free_mb: Vec<ResourceSample>,
    pub cached_mb: Vec<ResourceSample>,
    pub buffers_mb: Vec<ResourceSample>,
}

/// Utilization of one core, percentages in [0,100].

#[derive(Debug)]
pub struct CpuCoreSection {
    pub core: u32,
    pub user_pct: Vec<ResourceSample>,
    pub sys_pct: Vec<ResourceSample>,
    pub wait_pct: Vec<ResourceSample>,
    pub idle_pct: Vec<ResourceSample>,
}

/// A fully parsed nmon log for one node.

#[derive(Debug, Default)]
pub struct ResourceLog {
    /// Epoch seconds of every snapshot marker, in file order.
    pub timestamps: Vec<f64>,
    pub network: Vec<NetColumn>,
    pub disk_read: Vec<DiskColumn>,
    pub disk_write: Vec<DiskColumn>,
    pub disk_busy: Vec<DiskColumn>,
    pub memory: Option<MemorySection>,
    pub cpu_cores: Vec<CpuCoreSection>,
}

impl ResourceLog {
    pub fn network_series(&self, interface: &str, direction: Direction) -> Option<&[ResourceSample]> {
        self.network
            .iter()
            .find(|c| c.interface == interface && c.direction == direction)
            .map(|c| c.samples.as_slice())
    }

    pub fn disk_read_series(&self, device: &str) -> Option<&[ResourceSample]> {
        find_disk(&self.disk_read, device)
    }

    pub fn disk_write_series(&self, device: &str) -> Option<&[ResourceSample]> {
        find_disk(&self.disk_write, device)
    }

    pub fn disk_busy_series(&self, device: &str) -> Option<&[ResourceSample]> {
        find_disk(&self.disk_busy, device)
    }

    pub fn cpu_core(&self, core: u32) -> Option<&CpuCoreSection> {
        self.cpu_cores.iter().find(|c| c.core == core)
    }
}

fn find_disk<'a>(columns: &'a [DiskColumn], device: &str) -> Option<&'a [ResourceSample]> {
    columns
        .iter()
        .find(|c| c.device == device)
        .map(|c| c.samples.as_slice())
}

// Record tags we recognize.  Everything else (AAA preamble, BBB configuration dumps,
// NETPACKET, CPU_ALL, ...) is passed over.

#[derive(Debug, PartialEq, Eq)]
enum Tag {
    Snapshot,
    Net,
    DiskRead,
    DiskWrite,
    DiskBusy,
    Memory,
    CpuCore(u32),
    Other,
}

fn classify_tag(tag: &str) -> Tag {
    match tag {
        "ZZZZ" => Tag::Snapshot,
        "NET" => Tag::Net,
        "DISKREAD" => Tag::DiskRead,
        "DISKWRITE" => Tag::DiskWrite,
        "DISKBUSY" => Tag::DiskBusy,
        "MEM" => Tag::Memory,
        _ => {
            if let Some(digits) = tag.strip_prefix("CPU") {
                match digits.parse::<u32>() {
                    Ok(n) if digits.chars().all(|c| c.is_ascii_digit()) => Tag::CpuCore(n),
                    _ => Tag::Other,
                }
            } else {
                Tag::Other
            }
        }
    }
}

// Where each raw column of a section's value rows should be routed.  Headers we do not
// recognize get Skip so that later columns still line up.

enum NetSlot {
    Column(usize),
    Skip,
}

enum MemSlot {
    Total,
    Free,
    Cached,
    Buffers,
    Skip,
}

/// Parse the contents of an nmon log.  Returns the log and the number of lines dropped
/// because their snapshot timestamp could not be read.

pub fn parse_resource_log(content: &str) -> (ResourceLog, usize) {
    let mut log = ResourceLog::default();
    let mut discarded = 0usize;

    // Value rows seen before the first ZZZZ marker are paired with time zero; in practice
    // nmon emits a marker before the first row of every section.
    let mut current_time = 0.0f64;

    let mut net_plan: Option<Vec<NetSlot>> = None;
    let mut disk_read_plan: Option<Vec<Option<usize>>> = None;
    let mut disk_write_plan: Option<Vec<Option<usize>>> = None;
    let mut disk_busy_plan: Option<Vec<Option<usize>>> = None;
    let mut mem_plan: Option<Vec<MemSlot>> = None;
    let mut core_index: HashMap<u32, usize> = HashMap::new();

    for line in content.lines() {
        let fields = line.split(',').collect::<Vec<&str>>();
        match classify_tag(fields[0]) {
            Tag::Snapshot => {
                let time = fields.get(2).copied().unwrap_or("");
                let date = fields.get(3).copied().filter(|s| !s.is_empty());
                match parse_snapshot_time(time, date) {
                    Some(t) => {
                        current_time = t;
                        log.timestamps.push(t);
                    }
                    None => {
                        discarded += 1;
                    }
                }
            }
            Tag::Net => {
                if let Some(ref plan) = net_plan {
                    for (slot, value) in plan.iter().zip(values_of(&fields)) {
                        if let NetSlot::Column(ix) = slot {
                            log.network[*ix].samples.push(sample(current_time, value));
                        }
                    }
                } else {
                    let mut plan = vec![];
                    for header in headers_of(&fields) {
                        plan.push(match parse_net_header(header) {
                            Some((interface, direction)) => {
                                log.network.push(NetColumn {
                                    interface: Ustr::from(interface),
                                    direction,
                                    samples: vec![],
                                });
                                NetSlot::Column(log.network.len() - 1)
                            }
                            None => NetSlot::Skip,
                        });
                    }
                    net_plan = Some(plan);
                }
            }
            Tag::DiskRead => {
                disk_section(&fields, &mut disk_read_plan, &mut log.disk_read, current_time)
            }
            Tag::DiskWrite => {
                disk_section(&fields, &mut disk_write_plan, &mut log.disk_write, current_time)
            }
            Tag::DiskBusy => {
                disk_section(&fields, &mut disk_busy_plan, &mut log.disk_busy, current_time)
            }
            Tag::Memory => {
                if let Some(ref plan) = mem_plan {
                    let memory = log.memory.get_or_insert_with(MemorySection::default);
                    for (slot, value) in plan.iter().zip(values_of(&fields)) {
                        let s = sample(current_time, value);
                        match slot {
                            MemSlot::Total => memory.total_mb.push(s),
                            MemSlot::Free => memory.free_mb.push(s),
                            MemSlot::Cached => memory.cached_mb.push(s),
                            MemSlot::Buffers => memory.buffers_mb.push(s),
                            MemSlot::Skip => {}
                        }
                    }
                } else {
                    mem_plan = Some(
                        headers_of(&fields)
                            .map(|h| match h {
                                "memtotal" => MemSlot::Total,
                                "memfree" => MemSlot::Free,
                                "cached" => MemSlot::Cached,
                                "buffers" => MemSlot::Buffers,
                                _ => MemSlot::Skip,
                            })
                            .collect(),
                    );
                    log.memory.get_or_insert_with(MemorySection::default);
                }
            }
            Tag::CpuCore(core) => {
                if let Some(&ix) = core_index.get(&core) {
                    let section = &mut log.cpu_cores[ix];
                    let mut values = values_of(&fields);
                    section.user_pct.push(sample(current_time, values.next().flatten()));
                    section.sys_pct.push(sample(current_time, values.next().flatten()));
                    section.wait_pct.push(sample(current_time, values.next().flatten()));
                    section.idle_pct.push(sample(current_time, values.next().flatten()));
                } else {
                    // First occurrence is the header row (User%,Sys%,Wait%,Idle%,...).
                    core_index.insert(core, log.cpu_cores.len());
                    log.cpu_cores.push(CpuCoreSection {
                        core,
                        user_pct: vec![],
                        sys_pct: vec![],
                        wait_pct: vec![],
                        idle_pct: vec![],
                    });
                }
            }
            Tag::Other => {}
        }
    }

    (log, discarded)
}

/// Read and parse an nmon log file.

pub fn read_resource_log(file_name: &str) -> Result<(ResourceLog, usize)> {
    Ok(parse_resource_log(&std::fs::read_to_string(file_name)?))
}

/// Read every nmon log in a directory into a map from node name (the file stem) to its
/// parsed log.  Both `.nmon` and `.log` extensions are accepted; other files are ignored.

pub fn read_resource_directory(dir_name: &str) -> Result<HashMap<String, ResourceLog>> {
    let p = Path::new(dir_name);
    if !p.is_dir() {
        bail!("Not a viable nmon log directory: {dir_name}");
    }
    let mut logs = HashMap::new();
    for entry in p.read_dir()? {
        if entry.is_err() {
            // Bad directory entries are ignored, as for the experiment tree walk.
            continue;
        }
        let path = entry.unwrap().path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("nmon") | Some("log") => {}
            _ => continue,
        }
        let (Some(stem), Some(name)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.to_str(),
        ) else {
            continue;
        };
        let (log, _) = read_resource_log(name)?;
        logs.insert(stem.to_string(), log);
    }
    Ok(logs)
}

// The first two fields of every non-ZZZZ line are the tag and a label (section title on the
// header row, Tnnnn on value rows); columns proper start at field 2.

fn headers_of<'a>(fields: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    fields.iter().skip(2).copied()
}

fn values_of<'a>(fields: &'a [&'a str]) -> impl Iterator<Item = Option<f64>> + 'a {
    fields
        .iter()
        .skip(2)
        .map(|f| if f.is_empty() { None } else { f.parse::<f64>().ok() })
}

fn sample(time: f64, value: Option<f64>) -> ResourceSample {
    ResourceSample { time, value }
}

// Network headers look like "eth0-read-KB/s" / "eth0-write-KB/s".

fn parse_net_header(header: &str) -> Option<(&str, Direction)> {
    if let Some(ix) = header.find("-read-") {
        Some((&header[..ix], Direction::Read))
    } else if let Some(ix) = header.find("-write-") {
        Some((&header[..ix], Direction::Write))
    } else {
        None
    }
}

fn disk_section(
    fields: &[&str],
    plan: &mut Option<Vec<Option<usize>>>,
    columns: &mut Vec<DiskColumn>,
    current_time: f64,
) {
    if let Some(plan) = plan {
        for (slot, value) in plan.iter().zip(values_of(fields)) {
            if let Some(ix) = slot {
                columns[*ix].samples.push(sample(current_time, value));
            }
        }
    } else {
        let mut new_plan = vec![];
        for header in headers_of(fields) {
            if header.is_empty() {
                new_plan.push(None);
            } else {
                columns.push(DiskColumn {
                    device: Ustr::from(header),
                    samples: vec![],
                });
                new_plan.push(Some(columns.len() - 1));
            }
        }
        *plan = Some(new_plan);
    }
}

// A ZZZZ line is `ZZZZ,Tnnnn,HH:MM:SS,DD-MMM-YYYY`.  Some older captures omit the date
// field; those fall back to a time-only reading on the epoch day.

fn parse_snapshot_time(time: &str, date: Option<&str>) -> Option<f64> {
    let naive = match date {
        Some(date) => {
            NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%d-%b-%Y %H:%M:%S").ok()?
        }
        None => NaiveDate::from_ymd_opt(1970, 1, 1)?
            .and_time(NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?),
    };
    Some((naive.and_utc().timestamp() - UTC_OFFSET_SECS) as f64)
}

// This tests:
//  - header/value row separation per section
//  - pairing of every value with the snapshot in effect when it was read
//  - empty fields becoming None, not zero

#[test]
fn test_resource_log() {
    let text = "AAA,nmon,v14g\n\
                ZZZZ,T0001,12:00:00,01-JAN-2015\n\
                NET,Network I/O,eth0-read-KB/s,eth0-write-KB/s,total-KB/s,\n\
                DISKREAD,Disk Read KB/s,sda,sda1\n\
                DISKWRITE,Disk Write KB/s,sda,sda1\n\
                DISKBUSY,Disk Busy %,sda,sda1\n\
                MEM,Memory host1,memtotal,memfree,cached,buffers\n\
                CPU001,CPU 1 host1,User%,Sys%,Wait%,Idle%\n\
                NET,T0001,10.5,3.25,13.75,\n\
                DISKREAD,T0001,100.0,90.0\n\
                DISKWRITE,T0001,50.0,45.0\n\
                DISKBUSY,T0001,12.5,11.0\n\
                MEM,T0001,16000.0,8000.0,2000.0,500.0\n\
                CPU001,T0001,50.0,10.0,5.0,35.0\n\
                ZZZZ,T0002,12:00:10,01-JAN-2015\n\
                NET,T0002,11.0,,14.0,\n\
                CPU001,T0002,60.0,,5.0,30.0\n";
    let (log, discarded) = parse_resource_log(text);
    assert!(discarded == 0);

    // 2015-01-01 12:00:00 local wall-clock, minus the fixed correction.
    let t0 = (1420113600 - UTC_OFFSET_SECS) as f64;
    assert!(log.timestamps == vec![t0, t0 + 10.0]);

    let read = log.network_series("eth0", Direction::Read).unwrap();
    assert!(read.len() == 2);
    assert!(read[0] == ResourceSample { time: t0, value: Some(10.5) });
    assert!(read[1] == ResourceSample { time: t0 + 10.0, value: Some(11.0) });
    let write = log.network_series("eth0", Direction::Write).unwrap();
    assert!(write[0].value == Some(3.25));
    assert!(write[1].value.is_none());
    // "total-KB/s" matches neither direction pattern and is dropped.
    assert!(log.network.len() == 2);

    assert!(log.disk_read_series("sda").unwrap()[0].value == Some(100.0));
    assert!(log.disk_write_series("sda1").unwrap()[0].value == Some(45.0));
    assert!(log.disk_busy_series("sda").unwrap()[0].value == Some(12.5));
    assert!(log.disk_read_series("sdb").is_none());

    let memory = log.memory.as_ref().unwrap();
    assert!(memory.total_mb.len() == 1 && memory.total_mb[0].value == Some(16000.0));
    assert!(memory.free_mb[0].value == Some(8000.0));

    let core = log.cpu_core(1).unwrap();
    assert!(core.user_pct.len() == 2);
    assert!(core.user_pct[1] == ResourceSample { time: t0 + 10.0, value: Some(60.0) });
    assert!(core.sys_pct[1].value.is_none());
    assert!(core.idle_pct[0].value == Some(35.0));
}

// This tests:
//  - tag classification, in particular CPUnnn vs CPU_ALL

#[test]
fn test_classify_tag() {
    assert!(classify_tag("ZZZZ") == Tag::Snapshot);
    assert!(classify_tag("NET") == Tag::Net);
    assert!(classify_tag("CPU001") == Tag::CpuCore(1));
    assert!(classify_tag("CPU012") == Tag::CpuCore(12));
    assert!(classify_tag("CPU_ALL") == Tag::Other);
    assert!(classify_tag("NETPACKET") == Tag::Other);
    assert!(classify_tag("BBBP") == Tag::Other);
}

// This tests:
//  - the dateless fallback and the discard count for unreadable markers

#[test]
fn test_snapshot_time() {
    assert!(parse_snapshot_time("12:00:00", Some("01-JAN-2015"))
        == Some((1420113600 - UTC_OFFSET_SECS) as f64));
    assert!(parse_snapshot_time("01:02:03", None) == Some((3723 - UTC_OFFSET_SECS) as f64));
    assert!(parse_snapshot_time("notatime", None).is_none());

    let (log, discarded) = parse_resource_log("ZZZZ,T0001,garbage\n");
    assert!(discarded == 1);
    assert!(log.timestamps.is_empty());
}
