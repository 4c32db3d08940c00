//! Logging settings, read from `ES_*` environment variables.

use std::env;

/// Configuration for logging output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the root span
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or a full `EnvFilter` string)
    pub log_level: String,

    /// Whether to write logs to stdout
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "eventstore-bus".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Defaults, overridden by whichever variables are set:
    ///
    /// - `ES_SERVICE_NAME`: Service name (default: eventstore-bus)
    /// - `ES_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `ES_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `ES_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    #[must_use]
    pub fn from_env() -> Self {
        let in_container = ["KUBERNETES_SERVICE_HOST", "DOCKER_CONTAINER"]
            .iter()
            .any(|var| env::var_os(var).is_some());

        Self {
            service_name: env::var("ES_SERVICE_NAME")
                .unwrap_or_else(|_| "eventstore-bus".to_string()),

            log_level: env::var("ES_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .map_or_else(|_| "info".to_string(), |level| level.trim().to_string()),

            console_output: env::var("ES_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("ES_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(in_container),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "eventstore-bus");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("maybe"));
    }
}
