//! MCU MCP Server
//!
//! Exposes embedded-development operations (serial I/O, debug-probe control,
//! build invocation, project/git operations) as MCP tools over stdio. All
//! session state lives in `mcu_bridge_core`; this binary is the dispatcher
//! that maps tool names to capabilities, fills defaults, and normalizes
//! errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcu_bridge_core::encoding::Encoding;
use mcu_bridge_core::probe::{self, ops, DebugServerOptions, StartOutcome, StopOutcome};
use mcu_bridge_core::serial::{FlowMode, ParityMode, SerialConfig};
use mcu_bridge_core::{monitor, project, BridgeConfig, BridgeError, ProbeBackend, ProbeSupervisor, SerialManager};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_none() -> String {
    "none".to_string()
}
fn default_utf8() -> String {
    "utf8".to_string()
}
fn default_max_bytes() -> usize {
    4096
}
fn default_backend() -> String {
    "stutil".to_string()
}
fn default_build_tool() -> String {
    "make".to_string()
}
fn default_cwd() -> String {
    ".".to_string()
}
fn default_read_length() -> u64 {
    4
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListPortsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct OpenPortParams {
    /// Port path, e.g. /dev/ttyACM0 or COM3
    name: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    #[serde(default = "default_data_bits")]
    data_bits: u8,
    #[serde(default = "default_stop_bits")]
    stop_bits: u8,
    /// none, even, or odd
    #[serde(default = "default_none")]
    parity: String,
    /// none, software, or hardware
    #[serde(default = "default_none")]
    flow: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SerialWriteParams {
    data: String,
    /// utf8, hex, or base64
    #[serde(default = "default_utf8")]
    encoding: String,
    #[serde(default)]
    append_newline: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SerialReadParams {
    #[serde(default = "default_max_bytes")]
    max_bytes: usize,
    /// utf8, hex, or base64
    #[serde(default = "default_utf8")]
    encoding: String,
    /// 0 returns immediately; otherwise waits up to this long for data
    #[serde(default)]
    timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ClosePortParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ProbeListDevicesParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct FlashFirmwareParams {
    /// Firmware image path (.bin)
    path: String,
    /// Flash address; defaults to 0x08000000
    #[serde(default)]
    addr: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReadMemoryParams {
    /// 0x-prefixed hex or decimal
    addr: String,
    #[serde(default = "default_read_length")]
    length: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct WriteMemoryParams {
    addr: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ResetDeviceParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StartDebugParams {
    /// stutil, openocd, or jlink
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default)]
    port: Option<u16>,
    /// OpenOCD interface config file
    #[serde(default)]
    interface_cfg: Option<String>,
    /// OpenOCD target config file
    #[serde(default)]
    target_cfg: Option<String>,
    /// J-Link device name
    #[serde(default)]
    device: Option<String>,
    /// J-Link probe interface (SWD or JTAG)
    #[serde(default)]
    probe_interface: Option<String>,
    #[serde(default)]
    speed_khz: Option<u32>,
    /// Extra OpenOCD -c commands
    #[serde(default)]
    extra_commands: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StopDebugParams {
    #[serde(default = "default_backend")]
    backend: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetBreakpointParams {
    #[serde(default = "default_backend")]
    backend: String,
    /// 0x-prefixed hex or decimal
    addr: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct StepParams {
    #[serde(default = "default_backend")]
    backend: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReadVariableParams {
    #[serde(default = "default_backend")]
    backend: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct CompileParams {
    /// make or ide (STM32CubeIDE headless build)
    #[serde(default = "default_build_tool")]
    tool: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    /// Project name for the ide build
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct CreateProjectParams {
    /// make or cmake
    template: String,
    path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GetFileListParams {
    path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReadFileParams {
    path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct WriteFileParams {
    path: String,
    content: String,
    /// utf8, hex, or base64
    #[serde(default = "default_utf8")]
    encoding: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GitCommitParams {
    message: String,
    #[serde(default = "default_cwd")]
    cwd: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct GitDiffParams {
    #[serde(default = "default_cwd")]
    cwd: String,
}

fn to_mcp_error(e: BridgeError) -> McpError {
    let data = Some(json!({ "kind": e.kind() }));
    let message = e.to_string();
    match e {
        BridgeError::InvalidArgument(_) => McpError::invalid_params(message, data),
        _ => McpError::internal_error(message, data),
    }
}

fn command_run_result(run: mcu_bridge_core::CommandRun) -> CallToolResult {
    CallToolResult::structured(json!({
        "ok": run.ok,
        "tool": run.tool,
        "exit_code": run.exit_code,
        "stdout": run.stdout,
        "stderr": run.stderr,
    }))
}

fn parse_encoding(name: &str) -> Result<Encoding, McpError> {
    name.parse::<Encoding>().map_err(to_mcp_error)
}

fn parse_backend(name: &str) -> Result<ProbeBackend, McpError> {
    name.parse::<ProbeBackend>().map_err(to_mcp_error)
}

#[derive(Clone)]
struct McuMcpServer {
    tool_router: ToolRouter<Self>,
    config: Arc<BridgeConfig>,
    serial: Arc<SerialManager>,
    probes: Arc<ProbeSupervisor>,
}

#[tool_router]
impl McuMcpServer {
    fn new(config: BridgeConfig) -> Self {
        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            serial: Arc::new(SerialManager::new()),
            probes: Arc::new(ProbeSupervisor::new()),
        }
    }

    /// Best-effort monitor exchange with a running debug server.
    async fn monitor_exchange(
        &self,
        backend: &str,
        command: String,
    ) -> Result<CallToolResult, McpError> {
        let backend = parse_backend(backend)?;
        let port = self
            .probes
            .running_port(backend)
            .await
            .map_err(to_mcp_error)?;
        let output = monitor::send(port, &command, self.config.monitor_idle_timeout)
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "ok": true,
            "command": command,
            "output": output,
        })))
    }

    #[tool(description = "Enumerate available serial ports")]
    async fn list_ports(
        &self,
        _params: Parameters<ListPortsParams>,
    ) -> Result<CallToolResult, McpError> {
        let ports = self.serial.list().map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({ "ports": ports })))
    }

    #[tool(description = "Open a serial port session (only one can be open at a time)")]
    async fn open_port(
        &self,
        params: Parameters<OpenPortParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let config = SerialConfig {
            baud_rate: params.baud_rate,
            data_bits: params.data_bits,
            stop_bits: params.stop_bits,
            parity: params.parity.parse::<ParityMode>().map_err(to_mcp_error)?,
            flow: params.flow.parse::<FlowMode>().map_err(to_mcp_error)?,
        };

        self.serial
            .open(&params.name, &config, self.config.rx_high_water)
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "message": format!("Opened {} at {} baud", params.name, params.baud_rate),
        })))
    }

    #[tool(description = "Write bytes to the open serial port")]
    async fn serial_write(
        &self,
        params: Parameters<SerialWriteParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let encoding = parse_encoding(&params.encoding)?;
        let mut bytes = encoding.decode(&params.data).map_err(to_mcp_error)?;
        if params.append_newline {
            bytes.push(b'\n');
        }

        let written = self.serial.write(&bytes).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({
            "bytes_written": written,
        })))
    }

    #[tool(description = "Read buffered bytes from the open serial port, optionally waiting for data")]
    async fn serial_read(
        &self,
        params: Parameters<SerialReadParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let encoding = parse_encoding(&params.encoding)?;

        let bytes = self
            .serial
            .read(params.max_bytes, Duration::from_millis(params.timeout_ms))
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "data": encoding.encode(&bytes),
            "bytes": bytes.len(),
        })))
    }

    #[tool(description = "Close the serial port session (safe to call when already closed)")]
    async fn close_port(
        &self,
        _params: Parameters<ClosePortParams>,
    ) -> Result<CallToolResult, McpError> {
        let was_open = self.serial.close().await.map_err(to_mcp_error)?;
        let message = if was_open {
            "Serial port closed"
        } else {
            "No serial port was open"
        };
        Ok(CallToolResult::structured(json!({ "message": message })))
    }

    #[tool(description = "Enumerate attached ST-LINK debug probes")]
    async fn probe_list_devices(
        &self,
        _params: Parameters<ProbeListDevicesParams>,
    ) -> Result<CallToolResult, McpError> {
        let (tool, devices, run) = ops::list_devices(self.config.output_limit)
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "ok": run.ok,
            "tool": tool,
            "devices": devices,
            "stderr": run.stderr,
        })))
    }

    #[tool(description = "Flash a firmware image to the target via ST-LINK")]
    async fn probe_flash_firmware(
        &self,
        params: Parameters<FlashFirmwareParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let addr = params
            .addr
            .as_deref()
            .map(probe::parse_address)
            .transpose()
            .map_err(to_mcp_error)?;

        let run = ops::flash_firmware(Path::new(&params.path), addr, self.config.output_limit)
            .await
            .map_err(to_mcp_error)?;
        Ok(command_run_result(run))
    }

    #[tool(description = "Dump a memory range from the target via ST-LINK")]
    async fn probe_read_memory(
        &self,
        params: Parameters<ReadMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let addr = probe::parse_address(&params.addr).map_err(to_mcp_error)?;

        let read = ops::read_memory(addr, params.length, self.config.output_limit)
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "ok": read.run.ok,
            "tool": read.run.tool,
            "bytes": read.bytes,
            "stderr": read.run.stderr,
        })))
    }

    #[tool(description = "Write a memory word (unsupported outside a live debug session)")]
    async fn probe_write_memory(
        &self,
        params: Parameters<WriteMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let addr = probe::parse_address(&params.addr).map_err(to_mcp_error)?;
        let value = probe::parse_address(&params.value).map_err(to_mcp_error)?;

        ops::write_memory(addr, value).map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({ "ok": true })))
    }

    #[tool(description = "Reset the target device via ST-LINK")]
    async fn probe_reset_device(
        &self,
        _params: Parameters<ResetDeviceParams>,
    ) -> Result<CallToolResult, McpError> {
        let run = ops::reset_device(self.config.output_limit)
            .await
            .map_err(to_mcp_error)?;
        Ok(command_run_result(run))
    }

    #[tool(description = "Launch a GDB debug server (st-util, OpenOCD, or J-Link)")]
    async fn probe_start_debug(
        &self,
        params: Parameters<StartDebugParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let backend = parse_backend(&params.backend)?;
        let opts = DebugServerOptions {
            port: params.port,
            interface_cfg: params.interface_cfg,
            target_cfg: params.target_cfg,
            device: params.device,
            probe_interface: params.probe_interface,
            speed_khz: params.speed_khz,
            extra_commands: params.extra_commands,
        };

        let outcome = self
            .probes
            .start(backend, &opts, &self.config)
            .await
            .map_err(to_mcp_error)?;

        let result = match outcome {
            StartOutcome::Started { port } => json!({
                "status": "started",
                "backend": backend.label(),
                "port": port,
                "message": format!("{} debug server ready on port {}", backend.label(), port),
            }),
            StartOutcome::AlreadyRunning { port } => json!({
                "status": "already_running",
                "backend": backend.label(),
                "port": port,
                "message": format!("{} debug server is already running on port {}", backend.label(), port),
            }),
        };
        Ok(CallToolResult::structured(result))
    }

    #[tool(description = "Terminate a running GDB debug server")]
    async fn probe_stop_debug(
        &self,
        params: Parameters<StopDebugParams>,
    ) -> Result<CallToolResult, McpError> {
        let backend = parse_backend(&params.0.backend)?;
        let outcome = self
            .probes
            .stop(backend, self.config.probe_stop_grace)
            .await
            .map_err(to_mcp_error)?;

        let result = match outcome {
            StopOutcome::Stopped => json!({
                "status": "stopped",
                "backend": backend.label(),
                "message": format!("{} debug server stopped", backend.label()),
            }),
            StopOutcome::NotRunning => json!({
                "status": "not_running",
                "backend": backend.label(),
                "message": format!("No {} debug server is running", backend.label()),
            }),
        };
        Ok(CallToolResult::structured(result))
    }

    #[tool(description = "Set a breakpoint via the debug server monitor channel (best-effort)")]
    async fn probe_set_breakpoint(
        &self,
        params: Parameters<SetBreakpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let addr = probe::parse_address(&params.addr).map_err(to_mcp_error)?;
        self.monitor_exchange(&params.backend, monitor::breakpoint_command(addr))
            .await
    }

    #[tool(description = "Single-step the target via the debug server monitor channel (best-effort)")]
    async fn probe_step(&self, params: Parameters<StepParams>) -> Result<CallToolResult, McpError> {
        self.monitor_exchange(&params.0.backend, monitor::step_command())
            .await
    }

    #[tool(description = "Read a variable via the debug server monitor channel (best-effort)")]
    async fn probe_read_variable(
        &self,
        params: Parameters<ReadVariableParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        self.monitor_exchange(&params.backend, monitor::read_variable_command(&params.name))
            .await
    }

    #[tool(description = "Build a project with make or the STM32CubeIDE headless builder")]
    async fn compile(
        &self,
        params: Parameters<CompileParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let cwd = params.cwd.as_ref().map(PathBuf::from);
        let run = project::compile(
            &params.tool,
            params.target.as_deref(),
            cwd.as_deref(),
            params.project.as_deref(),
            self.config.output_limit,
        )
        .await
        .map_err(to_mcp_error)?;
        Ok(command_run_result(run))
    }

    #[tool(description = "Scaffold a minimal buildable firmware project (make or cmake template)")]
    async fn create_project(
        &self,
        params: Parameters<CreateProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let files = project::create_project(&params.template, Path::new(&params.path))
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "message": format!("Created {} project at {}", params.template, params.path),
            "files": files,
        })))
    }

    #[tool(description = "List project files, skipping VCS and build output")]
    async fn get_file_list(
        &self,
        params: Parameters<GetFileListParams>,
    ) -> Result<CallToolResult, McpError> {
        let files = project::file_list(Path::new(&params.0.path)).map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({ "files": files })))
    }

    #[tool(description = "Read a project file as text")]
    async fn read_file(
        &self,
        params: Parameters<ReadFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let content = project::read_file(Path::new(&params.0.path))
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({ "content": content })))
    }

    #[tool(description = "Write a project file, creating parent directories as needed")]
    async fn write_file(
        &self,
        params: Parameters<WriteFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let encoding = parse_encoding(&params.encoding)?;
        let bytes = encoding.decode(&params.content).map_err(to_mcp_error)?;

        let written = project::write_file(Path::new(&params.path), &bytes)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({
            "bytes_written": written,
        })))
    }

    #[tool(description = "Stage all changes and commit in the given working directory")]
    async fn git_commit(
        &self,
        params: Parameters<GitCommitParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let run = project::git_commit(
            Path::new(&params.cwd),
            &params.message,
            self.config.output_limit,
        )
        .await
        .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "ok": run.ok,
            "stdout": run.stdout,
            "stderr": run.stderr,
        })))
    }

    #[tool(description = "Show the unstaged diff in the given working directory")]
    async fn git_diff(
        &self,
        params: Parameters<GitDiffParams>,
    ) -> Result<CallToolResult, McpError> {
        let run = project::git_diff(Path::new(&params.0.cwd), self.config.output_limit)
            .await
            .map_err(to_mcp_error)?;

        Ok(CallToolResult::structured(json!({
            "ok": run.ok,
            "stdout": run.stdout,
            "stderr": run.stderr,
        })))
    }
}

#[tool_handler]
impl ServerHandler for McuMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "MCU MCP Server: serial port sessions, ST-LINK/OpenOCD/J-Link debug servers, \
                 flash/reset commands, and project scaffolding over stdio. One serial session \
                 and one debug server per backend at a time."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = McuMcpServer::new(BridgeConfig::from_env());
    let serial = server.serial.clone();
    let probes = server.probes.clone();
    let stop_grace = server.config.probe_stop_grace;

    let transport = transport::stdio();
    tracing::info!("Starting MCU MCP Server on stdio...");

    let service = server.serve(transport).await?;

    tokio::select! {
        res = service.waiting() => { res?; }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Best-effort teardown of hardware sessions before exit.
    if let Ok(true) = serial.close().await {
        tracing::info!("Closed serial session on shutdown");
    }
    probes.stop_all(stop_grace).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_port_params_fill_defaults() {
        let params: OpenPortParams =
            serde_json::from_str(r#"{"name": "/dev/ttyACM0"}"#).expect("minimal params");
        assert_eq!(params.baud_rate, 115_200);
        assert_eq!(params.data_bits, 8);
        assert_eq!(params.stop_bits, 1);
        assert_eq!(params.parity, "none");
        assert_eq!(params.flow, "none");
    }

    #[test]
    fn test_serial_read_params_default_to_nonblocking() {
        let params: SerialReadParams = serde_json::from_str("{}").expect("empty params");
        assert_eq!(params.max_bytes, 4096);
        assert_eq!(params.encoding, "utf8");
        assert_eq!(params.timeout_ms, 0);
    }

    #[test]
    fn test_start_debug_params_default_backend() {
        let params: StartDebugParams = serde_json::from_str("{}").expect("empty params");
        assert_eq!(params.backend, "stutil");
        assert!(params.port.is_none());
        assert!(params.extra_commands.is_empty());
    }

    #[test]
    fn test_compile_params_default_tool() {
        let params: CompileParams = serde_json::from_str("{}").expect("empty params");
        assert_eq!(params.tool, "make");
        assert!(params.target.is_none());
    }

    #[test]
    fn test_git_params_default_cwd() {
        let params: GitDiffParams = serde_json::from_str("{}").expect("empty params");
        assert_eq!(params.cwd, ".");
    }

    #[test]
    fn test_to_mcp_error_carries_kind_tag() {
        let err = to_mcp_error(BridgeError::NotOpen);
        let data = err.data.expect("kind data");
        assert_eq!(data["kind"], "not_open");

        let err = to_mcp_error(BridgeError::invalid_argument("bad address"));
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_write_memory_tool_always_fails() {
        let server = McuMcpServer::new(BridgeConfig::default());
        for (addr, value) in [("0x20000000", "0x1"), ("0", "0"), ("0x08000000", "4095")] {
            let err = server
                .probe_write_memory(Parameters(WriteMemoryParams {
                    addr: addr.to_string(),
                    value: value.to_string(),
                }))
                .await
                .expect_err("write_memory must always fail");
            let data = err.data.expect("kind data");
            assert_eq!(data["kind"], "unsupported");
        }
    }

    #[tokio::test]
    async fn test_serial_read_without_session_reports_not_open() {
        let server = McuMcpServer::new(BridgeConfig::default());
        let err = server
            .serial_read(Parameters(SerialReadParams {
                max_bytes: 16,
                encoding: "utf8".to_string(),
                timeout_ms: 0,
            }))
            .await
            .expect_err("no session is open");
        let data = err.data.expect("kind data");
        assert_eq!(data["kind"], "not_open");
    }

    #[tokio::test]
    async fn test_close_port_is_idempotent_through_the_tool() {
        let server = McuMcpServer::new(BridgeConfig::default());
        for _ in 0..2 {
            let result = server
                .close_port(Parameters(ClosePortParams {}))
                .await
                .expect("close must never fail");
            let value = result.structured_content.expect("structured result");
            assert_eq!(value["message"], "No serial port was open");
        }
    }

    #[tokio::test]
    async fn test_monitor_tools_require_a_running_server() {
        let server = McuMcpServer::new(BridgeConfig::default());
        let err = server
            .probe_step(Parameters(StepParams {
                backend: "openocd".to_string(),
            }))
            .await
            .expect_err("no debug server is running");
        let data = err.data.expect("kind data");
        assert_eq!(data["kind"], "debug_server_not_running");
    }

    #[tokio::test]
    async fn test_invalid_backend_name_is_invalid_params() {
        let server = McuMcpServer::new(BridgeConfig::default());
        let err = server
            .probe_stop_debug(Parameters(StopDebugParams {
                backend: "gdbserver".to_string(),
            }))
            .await
            .expect_err("unknown backend");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }
}
