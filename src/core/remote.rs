/// Remote command execution on Astra SL boards
///
/// Two transports are supported, both driven through the stock client tools:
/// - ADB (`adb exec-out`) for boards wired over USB
/// - SSH (`ssh`/`scp`) for boards on the network, multiplexed over a
///   persistent ControlMaster connection to keep per-poll latency low

use regex::Regex;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::{MonitorError, Result};
use crate::utils::split_args;

/// Device ID used when no address is given and no device can be detected
pub const DEFAULT_ADB_DEVICE: &str = "SL16x0";

/// Shell constructs `adb exec-out` cannot express without a remote shell
const UNSUPPORTED_SHELL_OPS: &[&str] = &["|", ";", "||", "`", "$(", "<", ">"];

/// Anything that can run commands on the board and move files to and from it
pub trait CommandRunner: Send + Sync {
    /// Run a command on the board and return its standard output
    fn run_cmd(&self, cmd: &str) -> impl Future<Output = Result<String>> + Send;

    /// Copy `src` to `dst`; `to_board` selects the direction
    fn copy(
        &self,
        src: &str,
        dst: &str,
        recursive: bool,
        to_board: bool,
    ) -> impl Future<Output = Result<()>> + Send;
}

// ============================================================================
// Process execution
// ============================================================================

fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a local program to completion, optionally bounded by `timeout`.
///
/// On success only stdout is returned so stray client warnings on stderr
/// never reach the stats parser. On failure stdout and stderr are combined
/// into the error.
async fn run_program(program: &str, args: &[String], timeout: Option<Duration>) -> Result<String> {
    let cmd_line = display_command(program, args);
    debug!(command = %cmd_line, "running local command");

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, command.output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(MonitorError::Timeout {
                    cmd: cmd_line,
                    secs: limit.as_secs(),
                })
            }
        },
        None => command.output().await,
    }
    .map_err(|source| MonitorError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(MonitorError::Command {
            cmd: cmd_line,
            output: combined,
        })
    }
}

// ============================================================================
// ADB
// ============================================================================

/// Runs commands through `adb -s <device> exec-out`
#[derive(Debug, Clone)]
pub struct AdbRunner {
    device_id: String,
    timeout: Duration,
    program: String,
}

impl AdbRunner {
    pub fn new(device_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            timeout,
            program: "adb".to_string(),
        }
    }

    /// Use a specific `adb` binary instead of the one on PATH
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Validate a command and break it into the argument lists executed
    /// one after another. `&&` is the only chaining operator accepted.
    pub fn command_parts(cmd: &str) -> Result<Vec<Vec<String>>> {
        if UNSUPPORTED_SHELL_OPS.iter().any(|op| cmd.contains(op)) {
            return Err(MonitorError::UnsupportedSyntax { cmd: cmd.to_string() });
        }

        let mut parts = Vec::new();
        for part in cmd.split("&&").map(str::trim).filter(|p| !p.is_empty()) {
            let args = split_args(part).ok_or_else(|| MonitorError::Command {
                cmd: part.to_string(),
                output: "Unterminated quote in command".to_string(),
            })?;
            parts.push(args);
        }

        if parts.is_empty() {
            return Err(MonitorError::Command {
                cmd: cmd.to_string(),
                output: "Empty command".to_string(),
            });
        }

        Ok(parts)
    }

    fn base_args(&self) -> Vec<String> {
        vec!["-s".to_string(), self.device_id.clone()]
    }

    pub fn exec_args(&self, args: &[String]) -> Vec<String> {
        let mut full = self.base_args();
        full.push("exec-out".to_string());
        full.extend(args.iter().cloned());
        full
    }

    pub fn copy_args(&self, src: &str, dst: &str, recursive: bool, to_board: bool) -> Vec<String> {
        let mut full = self.base_args();
        if to_board {
            full.push("push".to_string());
            if recursive {
                full.push("-r".to_string());
            }
        } else {
            // pull is always recursive; -a keeps timestamps
            full.push("pull".to_string());
            full.push("-a".to_string());
        }
        full.push(src.to_string());
        full.push(dst.to_string());
        full
    }
}

impl CommandRunner for AdbRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<String> {
        let parts = Self::command_parts(cmd)?;

        let mut results = Vec::with_capacity(parts.len());
        for args in parts {
            let full = self.exec_args(&args);
            results.push(run_program(&self.program, &full, Some(self.timeout)).await?);
        }

        Ok(results.join("\n"))
    }

    async fn copy(&self, src: &str, dst: &str, recursive: bool, to_board: bool) -> Result<()> {
        let args = self.copy_args(src, dst, recursive, to_board);
        run_program(&self.program, &args, Some(self.timeout)).await?;
        info!(device = %self.device_id, "Copied {} to {}", src, dst);
        Ok(())
    }
}

/// Extract the serials of attached, authorised devices from `adb devices` output
pub fn parse_adb_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices attached"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// List devices currently visible to `adb`
pub async fn list_adb_devices(program: &str, timeout: Duration) -> Result<Vec<String>> {
    let output = run_program(program, &["devices".to_string()], Some(timeout)).await?;
    Ok(parse_adb_devices(&output))
}

/// First attached ADB device, if any
pub async fn detect_adb_device(program: &str, timeout: Duration) -> Result<Option<String>> {
    Ok(list_adb_devices(program, timeout).await?.into_iter().next())
}

// ============================================================================
// SSH
// ============================================================================

/// Runs commands over SSH as root, sharing one multiplexed master connection
#[derive(Debug, Clone)]
pub struct SshRunner {
    board_ip: Ipv4Addr,
    timeout: Duration,
    keep_alive: Duration,
    socket: PathBuf,
}

impl SshRunner {
    pub fn new(board_ip: Ipv4Addr, timeout: Duration, keep_alive: Duration) -> Self {
        Self {
            board_ip,
            timeout,
            keep_alive,
            socket: Self::control_socket(board_ip),
        }
    }

    /// ControlPath used for the multiplexed connection to `board_ip`
    pub fn control_socket(board_ip: Ipv4Addr) -> PathBuf {
        let name = format!("ssh_mux_{}", board_ip.to_string().replace('.', "_"));
        std::env::temp_dir().join(name)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn target(&self) -> String {
        format!("root@{}", self.board_ip)
    }

    fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.target(), path)
    }

    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
        ]
    }

    fn control_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.socket.display()),
        ]
    }

    pub fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-MNf".to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.socket.display()),
            "-o".to_string(),
            format!("ControlPersist={}s", self.keep_alive.as_secs()),
            self.target(),
        ];
        args.extend(self.ssh_options());
        args
    }

    pub fn command_args(&self, cmd: &str) -> Vec<String> {
        let mut args = vec!["-T".to_string()];
        args.extend(self.control_options());
        args.extend(self.ssh_options());
        args.push(self.target());
        args.extend(cmd.split_whitespace().map(str::to_string));
        args
    }

    pub fn copy_args(&self, src: &str, dst: &str, recursive: bool, to_board: bool) -> Vec<String> {
        let (src, dst) = if to_board {
            (src.to_string(), self.remote_path(dst))
        } else {
            (self.remote_path(src), dst.to_string())
        };

        let mut args = Vec::new();
        if recursive {
            args.push("-r".to_string());
        }
        args.extend(self.control_options());
        args.push(src);
        args.push(dst);
        args
    }

    /// Start the background master connection. `ssh -f` forks once
    /// authenticated; the reaper task only collects the parent's exit status.
    pub async fn start_master(&self) -> Result<()> {
        let mut child = Command::new("ssh")
            .args(self.master_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| MonitorError::Spawn {
                program: "ssh".to_string(),
                source,
            })?;

        let target = self.target();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(%target, "SSH master connection established"),
                Ok(status) => warn!(%target, %status, "SSH master connection exited"),
                Err(e) => warn!(%target, "Failed to wait for SSH master: {}", e),
            }
        });

        Ok(())
    }

    /// Commands may need to open a direct connection while the master is
    /// still coming up, so allow for the connect phase on top of execution.
    fn command_deadline(&self) -> Duration {
        self.timeout * 2
    }
}

impl CommandRunner for SshRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<String> {
        let args = self.command_args(cmd);
        run_program("ssh", &args, Some(self.command_deadline())).await
    }

    async fn copy(&self, src: &str, dst: &str, recursive: bool, to_board: bool) -> Result<()> {
        let args = self.copy_args(src, dst, recursive, to_board);
        run_program("scp", &args, None).await?;
        info!(board = %self.board_ip, "Copied {} to {}", src, dst);
        Ok(())
    }
}

// ============================================================================
// Address classification and factory
// ============================================================================

/// Where the board is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardAddress {
    Adb(String),
    Ssh(Ipv4Addr),
}

fn adb_id_pattern() -> &'static Regex {
    static ADB_ID_RE: OnceLock<Regex> = OnceLock::new();
    ADB_ID_RE.get_or_init(|| Regex::new(r"^SL16x\d+$").expect("ADB id pattern is valid"))
}

fn ipv4_pattern() -> &'static Regex {
    static IPV4_RE: OnceLock<Regex> = OnceLock::new();
    IPV4_RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)$",
        )
        .expect("IPv4 pattern is valid")
    })
}

impl FromStr for BoardAddress {
    type Err = MonitorError;

    fn from_str(address: &str) -> Result<Self> {
        let invalid = || MonitorError::InvalidAddress {
            address: address.to_string(),
        };

        if adb_id_pattern().is_match(address) {
            Ok(Self::Adb(address.to_string()))
        } else if ipv4_pattern().is_match(address) {
            address.parse().map(Self::Ssh).map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for BoardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adb(id) => write!(f, "adb:{}", id),
            Self::Ssh(ip) => write!(f, "ssh:root@{}", ip),
        }
    }
}

/// Connection settings shared by both transports
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub adb_program: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(10),
            adb_program: "adb".to_string(),
        }
    }
}

/// Runner for whichever transport the board address selects
#[derive(Debug, Clone)]
pub enum BoardRunner {
    Adb(AdbRunner),
    Ssh(SshRunner),
}

impl BoardRunner {
    pub fn address(&self) -> BoardAddress {
        match self {
            Self::Adb(runner) => BoardAddress::Adb(runner.device_id.clone()),
            Self::Ssh(runner) => BoardAddress::Ssh(runner.board_ip),
        }
    }
}

impl CommandRunner for BoardRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<String> {
        match self {
            Self::Adb(runner) => runner.run_cmd(cmd).await,
            Self::Ssh(runner) => runner.run_cmd(cmd).await,
        }
    }

    async fn copy(&self, src: &str, dst: &str, recursive: bool, to_board: bool) -> Result<()> {
        match self {
            Self::Adb(runner) => runner.copy(src, dst, recursive, to_board).await,
            Self::Ssh(runner) => runner.copy(src, dst, recursive, to_board).await,
        }
    }
}

/// Resolve where the board lives, without touching the network
pub async fn resolve_address(address: Option<&str>, options: &RunnerOptions) -> Result<BoardAddress> {
    if let Some(address) = address {
        return address.parse();
    }

    match detect_adb_device(&options.adb_program, options.timeout).await {
        Ok(Some(device)) => {
            info!(%device, "Using first detected ADB device");
            Ok(BoardAddress::Adb(device))
        }
        Ok(None) => {
            warn!("No ADB device detected, falling back to {}", DEFAULT_ADB_DEVICE);
            Ok(BoardAddress::Adb(DEFAULT_ADB_DEVICE.to_string()))
        }
        Err(e) => {
            warn!("ADB device detection failed ({}), falling back to {}", e, DEFAULT_ADB_DEVICE);
            Ok(BoardAddress::Adb(DEFAULT_ADB_DEVICE.to_string()))
        }
    }
}

/// Build the runner for an address; SSH boards get their master connection started
pub async fn connect(address: Option<&str>, options: &RunnerOptions) -> Result<BoardRunner> {
    match resolve_address(address, options).await? {
        BoardAddress::Adb(device) => Ok(BoardRunner::Adb(
            AdbRunner::new(device, options.timeout).with_program(options.adb_program.clone()),
        )),
        BoardAddress::Ssh(ip) => {
            let runner = SshRunner::new(ip, options.timeout, options.keep_alive);
            runner.start_master().await?;
            info!(board = %ip, socket = %runner.socket().display(), "SSH runner ready");
            Ok(BoardRunner::Ssh(runner))
        }
    }
}
