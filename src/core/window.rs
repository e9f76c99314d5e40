//! Sliding-window view over the sample history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stats::cpu_sort_key;

/// Name of the aggregate cpu series
pub const AGGREGATE_CPU: &str = "cpu";

/// One plotted line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    /// Seconds since the start of the window
    pub x: Vec<f64>,
    /// Usage in percent
    pub y: Vec<f64>,
    /// Whole-system line (drawn thicker and fully opaque)
    pub aggregate: bool,
}

impl Series {
    pub fn latest(&self) -> Option<f64> {
        self.y.last().copied()
    }
}

/// Everything the dashboard draws for one refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub window_s: f64,
    pub cpu: Vec<Series>,
    pub npu: Option<Series>,
    /// Latest value per series, pre-formatted for the monospace panel
    pub latest: Vec<String>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.npu.is_none()
    }

    pub fn latest_text(&self) -> String {
        self.latest.join("\n")
    }
}

pub fn window_start(newest: f64, window_s: f64) -> f64 {
    newest - window_s
}

/// Keep points at or after `start`, rebasing x onto the window start
pub fn filter_series(points: &[(f64, f64)], start: f64) -> (Vec<f64>, Vec<f64>) {
    points
        .iter()
        .filter(|(t, _)| *t >= start)
        .map(|(t, v)| (t - start, *v))
        .unzip()
}

pub fn format_cpu_line(name: &str, value: f64) -> String {
    format!("{:>5}: {:5.1}%", name, value)
}

pub fn format_npu_line(value: f64) -> String {
    format!("  NPU: {:5.1}%", value)
}

/// Shape history into what the page renders.
///
/// `newest` is the timestamp of the most recent sample; the window ends there
/// rather than at the wall clock so a stalled board still shows its last data.
pub fn build_snapshot(
    cpu: &BTreeMap<String, Vec<(f64, f64)>>,
    npu: &[(f64, f64)],
    newest: Option<f64>,
    window_s: f64,
) -> Snapshot {
    let Some(newest) = newest else {
        return Snapshot {
            window_s,
            ..Snapshot::default()
        };
    };
    let start = window_start(newest, window_s);

    let mut labels: Vec<&String> = cpu.keys().collect();
    labels.sort_by_key(|label| cpu_sort_key(label));

    let mut snapshot = Snapshot {
        window_s,
        ..Snapshot::default()
    };

    for label in labels {
        let (x, y) = filter_series(&cpu[label], start);
        if x.is_empty() {
            continue;
        }
        let series = Series {
            name: label.clone(),
            x,
            y,
            aggregate: label == AGGREGATE_CPU,
        };
        if let Some(value) = series.latest() {
            snapshot.latest.push(format_cpu_line(&series.name, value));
        }
        snapshot.cpu.push(series);
    }

    let (x, y) = filter_series(npu, start);
    if !x.is_empty() {
        let series = Series {
            name: "NPU".to_string(),
            x,
            y,
            aggregate: false,
        };
        if let Some(value) = series.latest() {
            snapshot.latest.push(format_npu_line(value));
        }
        snapshot.npu = Some(series);
    }

    snapshot
}
