/// Discrete derivative of a cumulative counter series.
///
/// JMX exposes garbage collection work and Zookeeper packet traffic as monotonically
/// non-decreasing counters.  For visualization we want the opposite: discrete "events
/// happened here" markers.  The conversion takes consecutive counter readings and emits
/// (time, increment) for every step where the counter advanced; steps with no advance are
/// filtered out entirely.  The first sample only establishes the baseline and is never
/// itself emitted.
use crate::{Sample, Series};

/// Per-interval increments of a cumulative counter, zero-delta steps omitted.

pub fn discrete_deltas(series: &Series) -> Series {
    let mut deltas = vec![];
    let Some(first) = series.first() else {
        return deltas;
    };
    let mut previous = first.value;
    for sample in &series[1..] {
        let delta = sample.value - previous;
        if delta != 0.0 {
            deltas.push(Sample {
                time: sample.time,
                value: delta,
            });
        }
        previous = sample.value;
    }
    deltas
}

// This tests:
//  - zero-delta steps are omitted and the baseline sample is never emitted

#[test]
fn test_discrete_deltas() {
    let series = vec![
        Sample { time: 0.0, value: 5.0 },
        Sample { time: 1.0, value: 5.0 },
        Sample { time: 2.0, value: 8.0 },
        Sample { time: 3.0, value: 8.0 },
        Sample { time: 4.0, value: 9.0 },
    ];
    let deltas = discrete_deltas(&series);
    assert!(deltas == vec![
        Sample { time: 2.0, value: 3.0 },
        Sample { time: 4.0, value: 1.0 },
    ]);
}

// This tests:
//  - degenerate inputs

#[test]
fn test_discrete_deltas_short() {
    assert!(discrete_deltas(&vec![]).is_empty());
    assert!(discrete_deltas(&vec![Sample { time: 0.0, value: 7.0 }]).is_empty());
}
