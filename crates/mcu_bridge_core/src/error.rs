use thiserror::Error;

/// Uniform error taxonomy for every bridge capability.
///
/// One-shot tools that run but exit non-zero are NOT errors; they come back
/// as [`crate::CommandRun`] with `ok: false` so build/flash logs always reach
/// the caller. Only "the tool could not be found or started at all" is thrown.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Failed to spawn '{tool}': {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Access denied opening serial port {0}")]
    AccessDenied(String),

    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("No serial port is open")]
    NotOpen,

    #[error("Serial port {0} is already open; close it first")]
    AlreadyOpen(String),

    #[error("Debug server failed to start: {0}")]
    ProbeStartFailed(String),

    #[error("No {0} debug server is running")]
    DebugServerNotRunning(&'static str),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),
}

impl BridgeError {
    /// Stable kind tag attached to structured MCP error data.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::ToolNotFound(_) => "tool_not_found",
            BridgeError::SpawnFailed { .. } => "spawn_failed",
            BridgeError::AccessDenied(_) => "access_denied",
            BridgeError::PortNotFound(_) => "port_not_found",
            BridgeError::NotOpen => "not_open",
            BridgeError::AlreadyOpen(_) => "already_open",
            BridgeError::ProbeStartFailed(_) => "probe_start_failed",
            BridgeError::DebugServerNotRunning(_) => "debug_server_not_running",
            BridgeError::Unsupported(_) => "unsupported",
            BridgeError::InvalidArgument(_) => "invalid_argument",
            BridgeError::Io(_) => "io",
            BridgeError::Serial(_) => "serial",
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn spawn_failed(tool: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            tool: tool.into(),
            source,
        }
    }
}
