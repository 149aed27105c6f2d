//! One-shot probe commands through the ST-LINK command-line tools.

use std::path::Path;

use serde::Serialize;

use crate::runner::{self, CommandRun};
use crate::tools::{self, Tool};
use crate::{BridgeError, Result};

/// Default flash base of STM32 parts; used when no address is given.
pub const DEFAULT_FLASH_ADDR: u64 = 0x0800_0000;

/// One attached debug probe as reported by `st-info --probe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeDevice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chipid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
}

impl ProbeDevice {
    fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.serial.is_none()
            && self.flash.is_none()
            && self.sram.is_none()
            && self.chipid.is_none()
            && self.descr.is_none()
    }

    fn set(&mut self, key: &str, value: &str) {
        let value = Some(value.to_string());
        match key {
            "version" => self.version = value,
            "serial" => self.serial = value,
            "flash" => self.flash = value,
            "sram" => self.sram = value,
            "chipid" => self.chipid = value,
            "descr" => self.descr = value,
            _ => {}
        }
    }
}

/// Result of a memory dump, normalized to raw bytes.
#[derive(Debug)]
pub struct MemoryRead {
    pub run: CommandRun,
    pub bytes: Vec<u8>,
}

/// Enumerate attached ST-LINK probes.
pub async fn list_devices(output_limit: usize) -> Result<(String, Vec<ProbeDevice>, CommandRun)> {
    let resolution = tools::resolve(Tool::StInfo).await?;
    let run = runner::run(
        Tool::StInfo.default_name(),
        &resolution.path,
        &["--probe".to_string()],
        None,
        None,
        output_limit,
    )
    .await?;

    let devices = parse_probe_listing(&run.stdout);
    Ok((run.tool.clone(), devices, run))
}

/// Parse `st-info --probe` output: a `Found N stlink programmers` header
/// followed by indented `key: value` blocks, one block per probe (each
/// starting at its `version` line).
fn parse_probe_listing(output: &str) -> Vec<ProbeDevice> {
    let mut devices = Vec::new();
    let mut current = ProbeDevice::default();

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("Found ") {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == "version" && !current.is_empty() {
            devices.push(std::mem::take(&mut current));
        }
        current.set(key, value);
    }

    if !current.is_empty() {
        devices.push(current);
    }
    devices
}

/// Flash a firmware image at `addr` (flash base when omitted).
pub async fn flash_firmware(
    image_path: &Path,
    addr: Option<u64>,
    output_limit: usize,
) -> Result<CommandRun> {
    if !image_path.is_file() {
        return Err(BridgeError::invalid_argument(format!(
            "firmware image '{}' does not exist",
            image_path.display()
        )));
    }

    let resolution = tools::resolve(Tool::StFlash).await?;
    let addr = addr.unwrap_or(DEFAULT_FLASH_ADDR);
    runner::run(
        Tool::StFlash.default_name(),
        &resolution.path,
        &[
            "write".to_string(),
            image_path.display().to_string(),
            format!("{addr:#010x}"),
        ],
        None,
        None,
        output_limit,
    )
    .await
}

/// Dump `length` bytes starting at `addr`. `st-flash read` only writes to a
/// file, so the dump is staged through a temp file and returned as bytes.
pub async fn read_memory(addr: u64, length: u64, output_limit: usize) -> Result<MemoryRead> {
    if length == 0 {
        return Err(BridgeError::invalid_argument(
            "length must be at least 1 byte".to_string(),
        ));
    }

    let resolution = tools::resolve(Tool::StFlash).await?;
    let staging = tempfile::NamedTempFile::new()?;
    let staging_path = staging.path().display().to_string();

    let run = runner::run(
        Tool::StFlash.default_name(),
        &resolution.path,
        &[
            "read".to_string(),
            staging_path,
            format!("{addr:#010x}"),
            length.to_string(),
        ],
        None,
        None,
        output_limit,
    )
    .await?;

    let bytes = if run.ok {
        tokio::fs::read(staging.path()).await?
    } else {
        Vec::new()
    };

    Ok(MemoryRead { run, bytes })
}

/// Writing a register/memory word requires a live debug session; the
/// one-shot tools cannot do it. Hard, unconditional limitation.
pub fn write_memory(_addr: u64, _value: u64) -> Result<()> {
    Err(BridgeError::Unsupported(
        "writing memory requires a live debug session; start a debug server and use a GDB client"
            .to_string(),
    ))
}

/// Reset the target through the probe.
pub async fn reset_device(output_limit: usize) -> Result<CommandRun> {
    let resolution = tools::resolve(Tool::StFlash).await?;
    runner::run(
        Tool::StFlash.default_name(),
        &resolution.path,
        &["reset".to_string()],
        None,
        None,
        output_limit,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_PROBE: &str = "Found 1 stlink programmers\n\
        \x20 version:    V2J37S7\n\
        \x20 serial:     57FF6A064975545225502187\n\
        \x20 flash:      524288 (pagesize: 16384)\n\
        \x20 sram:       131072\n\
        \x20 chipid:     0x0413\n\
        \x20 descr:      F4xx\n";

    #[test]
    fn test_parse_single_probe() {
        let devices = parse_probe_listing(SINGLE_PROBE);
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.serial.as_deref(), Some("57FF6A064975545225502187"));
        assert_eq!(device.chipid.as_deref(), Some("0x0413"));
        assert_eq!(device.descr.as_deref(), Some("F4xx"));
        assert_eq!(device.flash.as_deref(), Some("524288 (pagesize: 16384)"));
    }

    #[test]
    fn test_parse_two_probes_split_on_version() {
        let output = "Found 2 stlink programmers\n\
            \x20 version:    V2J37S7\n\
            \x20 serial:     AAAA\n\
            \x20 version:    V3J8M3\n\
            \x20 serial:     BBBB\n";
        let devices = parse_probe_listing(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial.as_deref(), Some("AAAA"));
        assert_eq!(devices[1].serial.as_deref(), Some("BBBB"));
    }

    #[test]
    fn test_parse_no_probes() {
        assert!(parse_probe_listing("Found 0 stlink programmers\n").is_empty());
        assert!(parse_probe_listing("").is_empty());
    }

    #[test]
    fn test_write_memory_is_always_unsupported() {
        for (addr, value) in [(0u64, 0u64), (0x2000_0000, 42), (u64::MAX, u64::MAX)] {
            let err = write_memory(addr, value).unwrap_err();
            assert_eq!(err.kind(), "unsupported");
        }
    }

    #[tokio::test]
    async fn test_read_memory_rejects_zero_length() {
        let err = read_memory(0x0800_0000, 0, 1024).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_flash_missing_image_is_invalid_argument() {
        let err = flash_firmware(Path::new("/nonexistent/firmware.bin"), None, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
