pub mod error;
pub mod profiler;
pub mod remote;
pub mod stats;
pub mod window;

pub use error::{MonitorError, Result};
pub use profiler::{Poller, ProfilerConfig, ProfilerStatus, Sample, SystemProfiler};
pub use remote::{BoardAddress, BoardRunner, CommandRunner, RunnerOptions};
pub use window::Snapshot;
