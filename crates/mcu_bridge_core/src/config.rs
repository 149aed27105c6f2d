use std::time::Duration;

/// Process-wide bridge configuration.
///
/// Per-tool executable overrides are read separately from their own env vars
/// (see [`crate::tools::Tool::override_var`]); this struct carries the numeric
/// knobs shared by the capabilities.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for a debug server to print its ready phrase.
    pub probe_start_timeout: Duration,
    /// Grace period between the termination signal and the forced kill.
    pub probe_stop_grace: Duration,
    /// Cap on captured stdout/stderr of one-shot commands, per stream.
    pub output_limit: usize,
    /// High-water mark of the serial receive buffer; oldest bytes are
    /// dropped past it.
    pub rx_high_water: usize,
    /// Inactivity window after which a monitor-channel read is considered
    /// complete.
    pub monitor_idle_timeout: Duration,
}

const DEFAULT_OUTPUT_LIMIT: usize = 10 * 1024 * 1024;
const DEFAULT_RX_HIGH_WATER: usize = 1024 * 1024;

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            probe_start_timeout: Duration::from_secs(10),
            probe_stop_grace: Duration::from_millis(1500),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            rx_high_water: DEFAULT_RX_HIGH_WATER,
            monitor_idle_timeout: Duration::from_millis(600),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            probe_start_timeout: env_millis("PROBE_START_TIMEOUT_MS")
                .unwrap_or(defaults.probe_start_timeout),
            probe_stop_grace: env_millis("PROBE_STOP_GRACE_MS")
                .unwrap_or(defaults.probe_stop_grace),
            output_limit: env_usize("COMMAND_OUTPUT_LIMIT").unwrap_or(defaults.output_limit),
            rx_high_water: env_usize("SERIAL_RX_HIGH_WATER").unwrap_or(defaults.rx_high_water),
            monitor_idle_timeout: env_millis("MONITOR_IDLE_TIMEOUT_MS")
                .unwrap_or(defaults.monitor_idle_timeout),
        }
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn env_usize(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|v| v.parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.probe_start_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_stop_grace, Duration::from_millis(1500));
        assert_eq!(config.output_limit, 10 * 1024 * 1024);
        assert_eq!(config.rx_high_water, 1024 * 1024);
        assert_eq!(config.monitor_idle_timeout, Duration::from_millis(600));
    }

    #[test]
    fn test_from_env_custom() {
        std::env::set_var("PROBE_START_TIMEOUT_MS", "2500");
        std::env::set_var("SERIAL_RX_HIGH_WATER", "4096");

        let config = BridgeConfig::from_env();
        assert_eq!(config.probe_start_timeout, Duration::from_millis(2500));
        assert_eq!(config.rx_high_water, 4096);
        // Untouched knobs keep their defaults.
        assert_eq!(config.probe_stop_grace, Duration::from_millis(1500));

        std::env::remove_var("PROBE_START_TIMEOUT_MS");
        std::env::remove_var("SERIAL_RX_HIGH_WATER");
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        std::env::set_var("COMMAND_OUTPUT_LIMIT", "not-a-number");
        let config = BridgeConfig::from_env();
        assert_eq!(config.output_limit, 10 * 1024 * 1024);
        std::env::remove_var("COMMAND_OUTPUT_LIMIT");
    }
}
