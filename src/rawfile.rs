/// Parsers for the fixed-format per-node sample and metadata files.
///
/// The benchmark harness writes two kinds of small text files into each node directory:
///
/// - raw sample files (`raw-latency-data`, `raw-timestamp-data`): a header line followed by
///   one integer per line.  Latencies are recorded in microseconds and timestamps in
///   milliseconds; the single 1/1000 scale applied here maps the former to milliseconds and
///   the latter to seconds.
///
/// - key=value metadata files (`timestamps`): one `key=value` pair per line, values kept as
///   strings and interpreted by the caller.
///
/// NOTE:
///
/// - A node process that is killed mid-run leaves a partly-written last line in its sample
///   file.  Such a file yields an empty result rather than an error; callers treat the node
///   as having contributed nothing.  I/O errors, by contrast, are real errors and propagate.
use anyhow::Result;
use std::collections::HashMap;

/// Parse the contents of a raw sample file: discard the header line, then parse every
/// remaining line as an integer scaled by 1/1000.  Any unparseable line invalidates the whole
/// file and yields an empty vector.

pub fn parse_raw_values(content: &str) -> Vec<f64> {
    let mut values = vec![];
    for line in content.lines().skip(1) {
        match line.trim().parse::<i64>() {
            Ok(n) => values.push(n as f64 / 1000.0),
            Err(_) => return vec![],
        }
    }
    values
}

/// Read and parse a raw sample file.  See `parse_raw_values` for the malformed-line policy.

pub fn read_raw_values(file_name: &str) -> Result<Vec<f64>> {
    Ok(parse_raw_values(&std::fs::read_to_string(file_name)?))
}

/// Parse the contents of a key=value metadata file.  A line must contain exactly one `=` to
/// contribute an entry; all other lines are skipped silently.  Values are not interpreted.

pub fn parse_key_values(content: &str) -> HashMap<String, String> {
    let mut data = HashMap::new();
    for line in content.lines() {
        let parts = line.split('=').collect::<Vec<&str>>();
        if parts.len() == 2 {
            data.insert(parts[0].to_string(), parts[1].to_string());
        }
    }
    data
}

/// Read and parse a key=value metadata file.

pub fn read_key_values(file_name: &str) -> Result<HashMap<String, String>> {
    Ok(parse_key_values(&std::fs::read_to_string(file_name)?))
}

// This tests:
//  - header line is consumed, values are scaled by 1/1000

#[test]
fn test_raw_values_wellformed() {
    let content = "interval latencies in us\n1000\n2500\n300\n";
    let vs = parse_raw_values(content);
    assert!(vs.len() == 3);
    assert!(vs[0] == 1.0);
    assert!(vs[1] == 2.5);
    assert!(vs[2] == 0.3);
}

// This tests:
//  - a truncated trailing line voids the file instead of raising

#[test]
fn test_raw_values_truncated() {
    let content = "interval latencies in us\n1000\n2500\n30";
    assert!(parse_raw_values(content).len() == 3);
    let content = "interval latencies in us\n1000\n2500\n3x";
    assert!(parse_raw_values(content).is_empty());
    let content = "interval latencies in us\n1000\n\n2500\n";
    assert!(parse_raw_values(content).is_empty());
}

// This tests:
//  - a header-only (or empty) file yields no values

#[test]
fn test_raw_values_header_only() {
    assert!(parse_raw_values("interval latencies in us\n").is_empty());
    assert!(parse_raw_values("").is_empty());
}

// This tests:
//  - lines without exactly one `=` are skipped, valid lines are kept

#[test]
fn test_key_values() {
    let content = "startbenchmark=1000\nbogus line\nendbenchmark=3000\na=b=c\n";
    let kv = parse_key_values(content);
    assert!(kv.len() == 2);
    assert!(kv["startbenchmark"] == "1000");
    assert!(kv["endbenchmark"] == "3000");
}
