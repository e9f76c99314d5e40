/// Board polling loop and bounded sample history
///
/// A single task polls the board every interval, turns counter deltas into
/// usage samples and appends them to a ring shared with the web server.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::Result;
use super::remote::CommandRunner;
use super::stats::{compute_cpu_usage, npu_usage, parse_stats, RawStats, STATS_COMMAND};
use super::window::{build_snapshot, Snapshot};
use crate::utils::unix_now;

/// Smallest history kept regardless of interval/window
pub const MIN_HISTORY: usize = 100;

/// Largest history kept; a window needing more samples than this is truncated
pub const MAX_HISTORY: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilerConfig {
    pub interval: Duration,
    pub window: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            window: Duration::from_secs(10),
        }
    }
}

impl ProfilerConfig {
    /// Samples retained: enough to always cover the window
    pub fn history_length(&self) -> usize {
        let interval_ms = self.interval.as_millis().max(1);
        let needed = self.window.as_millis().div_ceil(interval_ms) + 1;
        usize::try_from(needed)
            .unwrap_or(MAX_HISTORY)
            .clamp(MIN_HISTORY, MAX_HISTORY)
    }
}

/// Usage derived from two consecutive polls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Unix seconds of the later poll
    pub timestamp: f64,
    pub cpu: BTreeMap<String, f64>,
    pub npu: f64,
}

/// Poller health as reported to the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilerStatus {
    /// Samples currently retained
    pub samples: usize,
    /// Samples produced since startup
    pub total_samples: u64,
    pub last_error: Option<String>,
    pub last_sample_at: Option<f64>,
}

#[derive(Debug)]
struct History {
    capacity: usize,
    samples: VecDeque<Sample>,
    total_samples: u64,
    last_error: Option<String>,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::new(),
            total_samples: 0,
            last_error: None,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_samples += 1;
        self.last_error = None;
    }
}

/// Shared handle to the sample history; cheap to clone
#[derive(Debug, Clone)]
pub struct SystemProfiler {
    config: ProfilerConfig,
    history: Arc<RwLock<History>>,
}

impl SystemProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            history: Arc::new(RwLock::new(History::new(config.history_length()))),
            config,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn history_length(&self) -> usize {
        self.read().capacity
    }

    // A panic while holding the lock cannot leave the ring half-updated,
    // so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, History> {
        self.history.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, History> {
        self.history.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, sample: Sample) {
        self.write().push(sample);
    }

    pub fn record_error(&self, error: String) {
        self.write().last_error = Some(error);
    }

    /// Per-cpu `(timestamp, usage)` pairs, oldest first
    pub fn cpu_history(&self) -> BTreeMap<String, Vec<(f64, f64)>> {
        let history = self.read();
        let mut series: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for sample in &history.samples {
            for (label, value) in &sample.cpu {
                series
                    .entry(label.clone())
                    .or_default()
                    .push((sample.timestamp, *value));
            }
        }
        series
    }

    /// NPU `(timestamp, usage)` pairs, oldest first
    pub fn npu_history(&self) -> Vec<(f64, f64)> {
        self.read()
            .samples
            .iter()
            .map(|s| (s.timestamp, s.npu))
            .collect()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.read().samples.back().cloned()
    }

    pub fn status(&self) -> ProfilerStatus {
        let history = self.read();
        ProfilerStatus {
            samples: history.samples.len(),
            total_samples: history.total_samples,
            last_error: history.last_error.clone(),
            last_sample_at: history.samples.back().map(|s| s.timestamp),
        }
    }

    /// Dashboard view of the trailing `window`
    pub fn snapshot(&self, window: Duration) -> Snapshot {
        let cpu = self.cpu_history();
        let npu = self.npu_history();
        let newest = npu.last().map(|(t, _)| *t);
        build_snapshot(&cpu, &npu, newest, window.as_secs_f64())
    }

    /// Spawn the polling loop; it runs until `shutdown` flips to true
    pub fn spawn<R>(&self, runner: R, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        R: CommandRunner + 'static,
    {
        let mut poller = Poller::new(runner, self.clone());
        let period = self.config.interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?period, "Polling loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => poller.tick().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Polling loop stopped");
        })
    }
}

/// Turns successive polls into samples for a [`SystemProfiler`]
pub struct Poller<R> {
    runner: R,
    profiler: SystemProfiler,
    previous: Option<(RawStats, f64)>,
}

impl<R: CommandRunner> Poller<R> {
    pub fn new(runner: R, profiler: SystemProfiler) -> Self {
        Self {
            runner,
            profiler,
            previous: None,
        }
    }

    /// Poll once at the current wall-clock time
    pub async fn poll(&mut self) -> Result<Option<Sample>> {
        self.poll_at(unix_now()).await
    }

    /// Poll the board and, once a baseline exists, record a sample stamped `now`.
    ///
    /// Failed polls leave the baseline untouched so the next success still
    /// yields a sample.
    pub async fn poll_at(&mut self, now: f64) -> Result<Option<Sample>> {
        let raw = self.runner.run_cmd(STATS_COMMAND).await?;
        let current = parse_stats(&raw)?;

        let sample = self.previous.as_ref().map(|(previous, previous_ts)| Sample {
            timestamp: now,
            cpu: compute_cpu_usage(previous, &current),
            npu: npu_usage(previous.infer_time_us, current.infer_time_us, now - previous_ts),
        });

        if let Some(sample) = &sample {
            debug!(cpu = ?sample.cpu.get("cpu"), npu = sample.npu, "sample");
            self.profiler.record(sample.clone());
        }
        self.previous = Some((current, now));

        Ok(sample)
    }

    /// Poll and record any failure instead of returning it
    pub async fn tick_at(&mut self, now: f64) {
        if let Err(e) = self.poll_at(now).await {
            warn!("Failed to fetch system stats: {}", e);
            self.profiler.record_error(e.to_string());
        }
    }

    pub async fn tick(&mut self) {
        self.tick_at(unix_now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::MonitorError;
    use std::sync::Mutex;

    /// Replays canned board output, one entry per poll
    struct ScriptedRunner {
        replies: Mutex<VecDeque<Result<String>>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run_cmd(&self, cmd: &str) -> Result<String> {
            assert_eq!(cmd, STATS_COMMAND);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::parse("script exhausted")))
        }

        async fn copy(&self, _src: &str, _dst: &str, _recursive: bool, _to_board: bool) -> Result<()> {
            Ok(())
        }
    }

    fn board_output(busy: u64, idle: u64, infer_us: u64) -> Result<String> {
        Ok(format!(
            "cpu  {busy} 0 0 {idle} 0 0 0 0 0 0\ncpu0 {busy} 0 0 {idle} 0 0 0 0 0 0\nintr 1\n{infer_us}\n"
        ))
    }

    fn failure() -> Result<String> {
        Err(MonitorError::Command {
            cmd: "adb -s SL16x0 exec-out cat /proc/stat".to_string(),
            output: "error: device 'SL16x0' not found".to_string(),
        })
    }

    #[test]
    fn test_history_length_covers_window() {
        assert_eq!(ProfilerConfig::default().history_length(), MIN_HISTORY);
        let fast = ProfilerConfig {
            interval: Duration::from_millis(50),
            window: Duration::from_secs(10),
        };
        assert_eq!(fast.history_length(), 201);
    }

    #[test]
    fn test_history_length_is_capped() {
        let huge = ProfilerConfig {
            interval: Duration::from_millis(1),
            window: Duration::from_secs(u64::MAX),
        };
        assert_eq!(huge.history_length(), MAX_HISTORY);

        // The ring grows on demand instead of reserving the whole cap
        let profiler = SystemProfiler::new(huge);
        assert_eq!(profiler.history_length(), MAX_HISTORY);
        assert_eq!(profiler.status().samples, 0);
    }

    #[tokio::test]
    async fn test_first_poll_is_baseline_only() {
        let profiler = SystemProfiler::new(ProfilerConfig::default());
        let runner = ScriptedRunner::new(vec![board_output(0, 0, 0), board_output(50, 50, 250_000)]);
        let mut poller = Poller::new(runner, profiler.clone());

        assert!(poller.poll_at(10.0).await.unwrap().is_none());
        assert_eq!(profiler.status().samples, 0);

        let sample = poller.poll_at(10.5).await.unwrap().unwrap();
        assert_eq!(sample.timestamp, 10.5);
        assert!((sample.cpu["cpu"] - 50.0).abs() < 1e-9);
        assert!((sample.npu - 50.0).abs() < 1e-9);
        assert_eq!(profiler.status().samples, 1);
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_polling() {
        let profiler = SystemProfiler::new(ProfilerConfig::default());
        let runner = ScriptedRunner::new(vec![
            board_output(0, 0, 0),
            failure(),
            Ok("garbage".to_string()),
            board_output(100, 100, 0),
        ]);
        let mut poller = Poller::new(runner, profiler.clone());

        poller.tick_at(1.0).await;
        poller.tick_at(2.0).await;
        let status = profiler.status();
        assert!(status.last_error.unwrap().contains("not found"));

        poller.tick_at(3.0).await;
        assert!(profiler.status().last_error.unwrap().contains("parse"));

        // Baseline from t=1.0 survives the failures
        poller.tick_at(4.0).await;
        let status = profiler.status();
        assert_eq!(status.samples, 1);
        assert!(status.last_error.is_none());
        assert_eq!(status.last_sample_at, Some(4.0));
        assert!((profiler.latest().unwrap().cpu["cpu0"] - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let profiler = SystemProfiler::new(ProfilerConfig::default());
        let polls = MIN_HISTORY + 20;
        let replies = (0..=polls as u64).map(|i| board_output(i * 10, i * 10, i * 1000)).collect();
        let mut poller = Poller::new(ScriptedRunner::new(replies), profiler.clone());

        for i in 0..=polls {
            poller.poll_at(i as f64).await.unwrap();
        }

        let status = profiler.status();
        assert_eq!(status.samples, MIN_HISTORY);
        assert_eq!(status.total_samples, polls as u64);
        let npu = profiler.npu_history();
        assert_eq!(npu.first().map(|(t, _)| *t), Some(21.0));
        assert_eq!(npu.last().map(|(t, _)| *t), Some(polls as f64));
    }

    #[tokio::test]
    async fn test_snapshot_uses_window() {
        let profiler = SystemProfiler::new(ProfilerConfig::default());
        let replies = (0..=20u64).map(|i| board_output(i * 10, i * 30, 0)).collect();
        let mut poller = Poller::new(ScriptedRunner::new(replies), profiler.clone());
        for i in 0..=20 {
            poller.poll_at(i as f64).await.unwrap();
        }

        let snapshot = profiler.snapshot(Duration::from_secs(5));
        assert_eq!(snapshot.cpu.len(), 2);
        assert_eq!(snapshot.cpu[0].x, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(snapshot.cpu[0].y.iter().all(|v| (v - 25.0).abs() < 1e-9));
        assert_eq!(snapshot.latest[0], "  cpu:  25.0%");
        assert_eq!(snapshot.latest.last().unwrap(), "  NPU:   0.0%");
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let profiler = SystemProfiler::new(ProfilerConfig {
            interval: Duration::from_millis(5),
            window: Duration::from_secs(1),
        });
        let replies = (0..1000u64).map(|i| board_output(i, i, 0)).collect();
        let (tx, rx) = watch::channel(false);
        let handle = profiler.spawn(ScriptedRunner::new(replies), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(profiler.status().total_samples > 0);
    }
}
