//! MCU Bridge Core
//!
//! A reusable async library for driving embedded-development tooling from an
//! MCP server: serial port sessions, ST-LINK/OpenOCD/J-Link debug servers,
//! one-shot flash/reset commands, and project scaffolding. Provides structured
//! config, a uniform error taxonomy, and high-level operations over external
//! command-line tools.

pub mod config;
pub mod encoding;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod project;
pub mod runner;
pub mod serial;
pub mod tools;

// Re-export commonly used types
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use probe::{ProbeBackend, ProbeSupervisor};
pub use runner::CommandRun;
pub use serial::SerialManager;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
