//! Debug-probe server supervision and one-shot probe commands.
//!
//! Three interchangeable GDB-server backends (st-util, OpenOCD, J-Link) are
//! supervised as single-instance slots; one-shot flash/reset/memory commands
//! go through the ST-LINK command-line tools.

pub mod ops;

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::tools::{self, Tool};
use crate::{BridgeConfig, BridgeError, Result};

/// Lines of startup output kept for the failure report.
const TRANSCRIPT_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeBackend {
    StUtil,
    OpenOcd,
    JLink,
}

impl FromStr for ProbeBackend {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stutil" | "st-util" | "stlink" => Ok(ProbeBackend::StUtil),
            "openocd" => Ok(ProbeBackend::OpenOcd),
            "jlink" | "j-link" => Ok(ProbeBackend::JLink),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown debug backend '{other}' (expected stutil, openocd, or jlink)"
            ))),
        }
    }
}

impl ProbeBackend {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeBackend::StUtil => "st-util",
            ProbeBackend::OpenOcd => "openocd",
            ProbeBackend::JLink => "jlink",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProbeBackend::StUtil => 4242,
            ProbeBackend::OpenOcd => 3333,
            ProbeBackend::JLink => 2331,
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            ProbeBackend::StUtil => Tool::StUtil,
            ProbeBackend::OpenOcd => Tool::OpenOcd,
            ProbeBackend::JLink => Tool::JLinkGdbServer,
        }
    }

    /// Phrase each backend prints once its GDB listener is up.
    fn ready_phrase(&self) -> &'static str {
        match self {
            ProbeBackend::StUtil => "Listening at",
            ProbeBackend::OpenOcd => "for gdb connections",
            ProbeBackend::JLink => "Waiting for GDB connection",
        }
    }
}

/// Per-call options for `start`; anything omitted gets a backend default.
#[derive(Debug, Clone, Default)]
pub struct DebugServerOptions {
    pub port: Option<u16>,
    pub interface_cfg: Option<String>,
    pub target_cfg: Option<String>,
    pub device: Option<String>,
    pub probe_interface: Option<String>,
    pub speed_khz: Option<u32>,
    pub extra_commands: Vec<String>,
}

fn build_args(backend: ProbeBackend, port: u16, opts: &DebugServerOptions) -> Vec<String> {
    match backend {
        ProbeBackend::StUtil => vec!["-p".to_string(), port.to_string()],
        ProbeBackend::OpenOcd => {
            let interface = opts
                .interface_cfg
                .clone()
                .unwrap_or_else(|| "interface/stlink.cfg".to_string());
            let target = opts
                .target_cfg
                .clone()
                .unwrap_or_else(|| "target/stm32f4x.cfg".to_string());
            let mut args = vec![
                "-f".to_string(),
                interface,
                "-f".to_string(),
                target,
                "-c".to_string(),
                format!("gdb_port {port}"),
            ];
            if let Some(khz) = opts.speed_khz {
                args.push("-c".to_string());
                args.push(format!("adapter speed {khz}"));
            }
            for command in &opts.extra_commands {
                args.push("-c".to_string());
                args.push(command.clone());
            }
            args
        }
        ProbeBackend::JLink => vec![
            "-device".to_string(),
            opts.device
                .clone()
                .unwrap_or_else(|| "STM32F103C8".to_string()),
            "-if".to_string(),
            opts.probe_interface
                .clone()
                .unwrap_or_else(|| "SWD".to_string()),
            "-speed".to_string(),
            opts.speed_khz.unwrap_or(4000).to_string(),
            "-port".to_string(),
            port.to_string(),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { port: u16 },
    AlreadyRunning { port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug)]
struct ProbeServer {
    child: Child,
    gdb_port: u16,
    drain: JoinHandle<()>,
}

/// At most one running server per backend slot; the three slots are
/// independent.
pub struct ProbeSupervisor {
    slots: Mutex<HashMap<ProbeBackend, ProbeServer>>,
}

impl ProbeSupervisor {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Start a debug server. A live slot makes this an "already running"
    /// no-op; a slot whose child exited behind our back is reaped first.
    pub async fn start(
        &self,
        backend: ProbeBackend,
        opts: &DebugServerOptions,
        config: &BridgeConfig,
    ) -> Result<StartOutcome> {
        let mut slots = self.slots.lock().await;

        if let Some(server) = slots.get_mut(&backend) {
            match server.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(
                        backend = backend.label(),
                        %status,
                        "debug server exited unexpectedly, clearing slot"
                    );
                    if let Some(server) = slots.remove(&backend) {
                        server.drain.abort();
                    }
                }
                _ => {
                    let port = server.gdb_port;
                    return Ok(StartOutcome::AlreadyRunning { port });
                }
            }
        }

        let resolution = tools::resolve(backend.tool()).await?;
        let port = opts.port.unwrap_or_else(|| backend.default_port());
        let args = build_args(backend, port, opts);

        tracing::info!(
            backend = backend.label(),
            tool = %resolution.path.display(),
            port,
            "starting debug server"
        );

        let mut command = Command::new(&resolution.path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let server = spawn_and_await_ready(
            backend.label(),
            command,
            backend.ready_phrase(),
            config.probe_start_timeout,
            port,
        )
        .await?;

        slots.insert(backend, server);
        Ok(StartOutcome::Started { port })
    }

    /// Stop a debug server: termination signal, grace period, forced kill.
    /// The slot is cleared before the child is confirmed dead.
    pub async fn stop(&self, backend: ProbeBackend, grace: Duration) -> Result<StopOutcome> {
        let server = {
            let mut slots = self.slots.lock().await;
            slots.remove(&backend)
        };
        let Some(mut server) = server else {
            return Ok(StopOutcome::NotRunning);
        };

        if let Ok(Some(status)) = server.child.try_wait() {
            tracing::info!(backend = backend.label(), %status, "debug server already exited");
            server.drain.abort();
            return Ok(StopOutcome::Stopped);
        }

        terminate(&server.child);
        match timeout(grace, server.child.wait()).await {
            Ok(status) => {
                tracing::info!(backend = backend.label(), ?status, "debug server stopped");
            }
            Err(_) => {
                tracing::warn!(
                    backend = backend.label(),
                    "debug server ignored termination signal, killing"
                );
                let _ = server.child.kill().await;
            }
        }
        server.drain.abort();
        Ok(StopOutcome::Stopped)
    }

    /// Stop every running backend; used on shutdown.
    pub async fn stop_all(&self, grace: Duration) {
        for backend in [ProbeBackend::StUtil, ProbeBackend::OpenOcd, ProbeBackend::JLink] {
            let _ = self.stop(backend, grace).await;
        }
    }

    /// Listen port of a running backend, reaping a dead child on the way.
    pub async fn running_port(&self, backend: ProbeBackend) -> Result<u16> {
        let mut slots = self.slots.lock().await;
        let Some(server) = slots.get_mut(&backend) else {
            return Err(BridgeError::DebugServerNotRunning(backend.label()));
        };
        if let Ok(Some(status)) = server.child.try_wait() {
            tracing::warn!(
                backend = backend.label(),
                %status,
                "debug server exited unexpectedly, clearing slot"
            );
            if let Some(server) = slots.remove(&backend) {
                server.drain.abort();
            }
            return Err(BridgeError::DebugServerNotRunning(backend.label()));
        }
        Ok(server.gdb_port)
    }
}

impl Default for ProbeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(pid, error = %e, "failed to signal debug server");
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {
    // No graceful signal available; the grace timeout falls through to kill.
}

/// Spawn the server and watch its merged output for the ready phrase.
/// Early exit, pipe close, or the deadline all fail the start with the
/// captured transcript.
async fn spawn_and_await_ready(
    label: &'static str,
    mut command: Command,
    ready_phrase: &str,
    start_timeout: Duration,
    port: u16,
) -> Result<ProbeServer> {
    let mut child = command
        .spawn()
        .map_err(|e| BridgeError::spawn_failed(label, e))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = Instant::now() + start_timeout;
    let mut transcript: VecDeque<String> = VecDeque::new();

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
                return Err(BridgeError::ProbeStartFailed(format!(
                    "{label} exited before becoming ready ({status}): {}",
                    render_transcript(&transcript)
                )));
            }
            line = rx.recv() => {
                match line {
                    Some(line) => {
                        tracing::debug!(backend = label, "{line}");
                        let matched = line.contains(ready_phrase);
                        push_transcript(&mut transcript, line);
                        if matched {
                            break;
                        }
                    }
                    None => {
                        let status = child.wait().await;
                        let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
                        return Err(BridgeError::ProbeStartFailed(format!(
                            "{label} closed its output before becoming ready ({status}): {}",
                            render_transcript(&transcript)
                        )));
                    }
                }
            }
            _ = sleep_until(deadline) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(BridgeError::ProbeStartFailed(format!(
                    "{label} did not become ready within {start_timeout:?}: {}",
                    render_transcript(&transcript)
                )));
            }
        }
    }

    tracing::info!(backend = label, port, "debug server ready");

    let drain = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            tracing::debug!(backend = label, "{line}");
        }
    });

    Ok(ProbeServer {
        child,
        gdb_port: port,
        drain,
    })
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

fn push_transcript(transcript: &mut VecDeque<String>, line: String) {
    transcript.push_back(line);
    while transcript.len() > TRANSCRIPT_LINES {
        transcript.pop_front();
    }
}

fn render_transcript(transcript: &VecDeque<String>) -> String {
    if transcript.is_empty() {
        "<no output>".to_string()
    } else {
        transcript.iter().cloned().collect::<Vec<_>>().join(" | ")
    }
}

/// Parse a target address from `0x…` hex or plain decimal.
pub fn parse_address(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        trimmed.parse::<u64>()
    };
    parsed.map_err(|_| {
        BridgeError::invalid_argument(format!(
            "invalid address '{input}' (expected 0x-prefixed hex or decimal)"
        ))
    })
}
