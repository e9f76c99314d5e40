//! Parsing of raw board counters and conversion into usage percentages.
//!
//! The board is polled with `/proc/stat` followed by the cumulative NPU
//! inference time (microseconds) exposed by the `synap` driver. Usage is the
//! delta between two consecutive polls.

use serde::Serialize;
use std::collections::BTreeMap;

use super::error::{MonitorError, Result};

/// Command polled on the board each interval
pub const STATS_COMMAND: &str =
    "cat /proc/stat && cat /sys/class/misc/synap/statistics/inference_time";

/// Index of the `idle` and `iowait` columns in a `/proc/stat` cpu line
const IDLE: usize = 3;
const IOWAIT: usize = 4;

/// One poll worth of cumulative counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawStats {
    /// `cpu` (aggregate) and `cpuN` jiffy counters
    pub cpus: BTreeMap<String, Vec<u64>>,
    /// Cumulative NPU inference time in microseconds
    pub infer_time_us: u64,
}

/// Parse the combined `/proc/stat` + inference time output
pub fn parse_stats(raw: &str) -> Result<RawStats> {
    let lines: Vec<&str> = raw.trim().lines().filter(|l| !l.trim().is_empty()).collect();

    let mut cpus = BTreeMap::new();
    for line in &lines {
        if !line.starts_with("cpu") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(label) => label.to_string(),
            None => continue,
        };
        let counters = fields
            .map(|f| f.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MonitorError::parse(format!("bad counter on line '{}': {}", line, e)))?;
        if counters.len() <= IOWAIT {
            return Err(MonitorError::parse(format!(
                "expected at least {} counters for {}, got {}",
                IOWAIT + 1,
                label,
                counters.len()
            )));
        }
        cpus.insert(label, counters);
    }

    if cpus.is_empty() {
        return Err(MonitorError::parse("no cpu lines in /proc/stat output"));
    }

    let last = lines
        .last()
        .ok_or_else(|| MonitorError::parse("empty output"))?
        .trim();
    let infer_time_us = last
        .parse::<u64>()
        .map_err(|_| MonitorError::parse(format!("bad NPU inference time '{}'", last)))?;

    Ok(RawStats { cpus, infer_time_us })
}

/// Busy percentage per cpu label between two polls.
///
/// Idle time is `idle + iowait`. Labels missing from `curr` are skipped and
/// counters that went backwards count as zero.
pub fn compute_cpu_usage(prev: &RawStats, curr: &RawStats) -> BTreeMap<String, f64> {
    let mut usage = BTreeMap::new();

    for (label, before) in &prev.cpus {
        let Some(after) = curr.cpus.get(label) else {
            continue;
        };

        let total: u64 = before
            .iter()
            .zip(after)
            .map(|(b, a)| a.saturating_sub(*b))
            .sum();
        let idle = (after[IDLE] + after[IOWAIT]).saturating_sub(before[IDLE] + before[IOWAIT]);

        let percent = if total > 0 {
            100.0 * (1.0 - idle as f64 / total as f64)
        } else {
            0.0
        };
        usage.insert(label.clone(), percent.clamp(0.0, 100.0));
    }

    usage
}

/// NPU busy percentage from the inference time counter delta over `dt_s` seconds
pub fn npu_usage(prev_us: u64, curr_us: u64, dt_s: f64) -> f64 {
    if dt_s <= 0.0 {
        return 0.0;
    }
    let busy_us = curr_us as f64 - prev_us as f64;
    (100.0 * busy_us / (dt_s * 1_000_000.0)).clamp(0.0, 100.0)
}

/// Display order for cpu labels: the aggregate first, then cores numerically
pub fn cpu_sort_key(label: &str) -> (u8, u32, String) {
    match label.strip_prefix("cpu").map(str::parse::<u32>) {
        Some(Ok(core)) => (1, core, String::new()),
        _ if label == "cpu" => (0, 0, String::new()),
        _ => (2, 0, label.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL_A: &str = "\
cpu  100 0 100 700 100 0 0 0 0 0
cpu0 50 0 50 350 50 0 0 0 0 0
cpu1 50 0 50 350 50 0 0 0 0 0
intr 12345 0 0
ctxt 987654
btime 1700000000
processes 4242
procs_running 2
procs_blocked 0
softirq 1 2 3
1000000
";

    const POLL_B: &str = "\
cpu  150 0 150 800 100 0 0 0 0 0
cpu0 100 0 100 350 50 0 0 0 0 0
cpu1 50 0 50 450 50 0 0 0 0 0
intr 12400 0 0
ctxt 987700
1250000
";

    #[test]
    fn test_parse_stats() {
        let stats = parse_stats(POLL_A).unwrap();
        assert_eq!(stats.cpus.len(), 3);
        assert_eq!(stats.cpus["cpu"], vec![100, 0, 100, 700, 100, 0, 0, 0, 0, 0]);
        assert_eq!(stats.cpus["cpu1"][IDLE], 350);
        assert_eq!(stats.infer_time_us, 1_000_000);
    }

    #[test]
    fn test_parse_stats_errors() {
        assert!(parse_stats("").is_err());
        assert!(parse_stats("cpu 1 2 3 4 5\nnot-a-number\n").is_err());
        assert!(parse_stats("cpu 1 2 x 4 5\n10\n").is_err());
        assert!(parse_stats("cpu 1 2 3\n10\n").is_err());
        assert!(parse_stats("intr 1 2\n10\n").is_err());
    }

    #[test]
    fn test_compute_cpu_usage() {
        let a = parse_stats(POLL_A).unwrap();
        let b = parse_stats(POLL_B).unwrap();
        let usage = compute_cpu_usage(&a, &b);

        // aggregate: total delta 200, idle delta 100
        assert!((usage["cpu"] - 50.0).abs() < 1e-9);
        // cpu0 fully busy, cpu1 fully idle
        assert!((usage["cpu0"] - 100.0).abs() < 1e-9);
        assert!(usage["cpu1"].abs() < 1e-9);
    }

    #[test]
    fn test_cpu_usage_without_progress_is_zero() {
        let a = parse_stats(POLL_A).unwrap();
        let usage = compute_cpu_usage(&a, &a);
        assert!(usage.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cpu_usage_skips_vanished_cores() {
        let a = parse_stats(POLL_A).unwrap();
        let mut b = parse_stats(POLL_B).unwrap();
        b.cpus.remove("cpu1");
        let usage = compute_cpu_usage(&a, &b);
        assert!(usage.contains_key("cpu0"));
        assert!(!usage.contains_key("cpu1"));
    }

    #[test]
    fn test_npu_usage() {
        assert!((npu_usage(1_000_000, 1_250_000, 0.5) - 50.0).abs() < 1e-9);
        assert_eq!(npu_usage(0, 5_000_000, 1.0), 100.0);
        assert_eq!(npu_usage(5_000_000, 0, 1.0), 0.0);
        assert_eq!(npu_usage(0, 100, 0.0), 0.0);
    }

    #[test]
    fn test_cpu_sort_key() {
        let mut labels = vec!["cpu10", "cpu2", "cpu", "cpu0"];
        labels.sort_by_key(|l| cpu_sort_key(l));
        assert_eq!(labels, vec!["cpu", "cpu0", "cpu2", "cpu10"]);
    }
}
