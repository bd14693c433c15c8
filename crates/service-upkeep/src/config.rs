// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::driver::ProbeFamily;
use crate::error::UpkeepError;
use std::env;
use std::time::Duration;

/// Heartbeat used when a container does not carry a usable `heartbeat` label.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60 * 60);
/// TTL used when a container does not carry a usable `ttl` label.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 + 30);
/// Probe interval used when a container does not carry a usable `probe_heartbeat` label.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for one heartbeat cycle against the coordination store.
pub const UPKEEP_TIMEOUT: Duration = Duration::from_millis(250);
/// Deadline for one probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
/// Consecutive probe failures tolerated before the lease is let go.
pub const MAX_FAIL_ATTEMPTS: u32 = 3;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Process-wide configuration for the upkeep agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// The netloc of this node as seen by other nodes (e.g., "10.0.0.7")
    pub advertise: String,
    /// Location of the coordination store
    pub discovery: String,
    /// Probe family used for every service tracked by this process
    pub probe_family: ProbeFamily,
    /// Deadline for a single heartbeat cycle
    pub upkeep_timeout: Duration,
    /// Deadline for a single probe
    pub probe_timeout: Duration,
    /// Consecutive probe failures before the failure gate closes
    pub max_fail_attempts: u32,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            advertise: "127.0.0.1".to_string(),
            discovery: "http://127.0.0.1:2379".to_string(),
            probe_family: ProbeFamily::Tcp,
            upkeep_timeout: UPKEEP_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
            max_fail_attempts: MAX_FAIL_ATTEMPTS,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, UpkeepError> {
        let advertise = env::var("UPKEEP_ADVERTISE").map_err(|_| {
            UpkeepError::InvalidConfig("UPKEEP_ADVERTISE must be set".to_string())
        })?;
        let discovery = env::var("UPKEEP_DISCOVERY").map_err(|_| {
            UpkeepError::InvalidConfig("UPKEEP_DISCOVERY must be set".to_string())
        })?;
        let probe_family = match env::var("UPKEEP_PROBE") {
            Ok(val) => val.parse::<ProbeFamily>()?,
            Err(_) => ProbeFamily::Tcp,
        };
        let upkeep_timeout =
            parse_duration_or(env::var("UPKEEP_UPKEEP_TIMEOUT").ok().as_deref(), UPKEEP_TIMEOUT);
        let probe_timeout =
            parse_duration_or(env::var("UPKEEP_PROBE_TIMEOUT").ok().as_deref(), PROBE_TIMEOUT);
        let max_fail_attempts = env::var("UPKEEP_MAX_FAIL")
            .ok()
            .and_then(|val| val.parse::<u32>().ok())
            .unwrap_or(MAX_FAIL_ATTEMPTS);
        let log_level = env::var("LOG_LEVEL")
            .map(|val| normalize_log_level(&val))
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            advertise,
            discovery,
            probe_family,
            upkeep_timeout,
            probe_timeout,
            max_fail_attempts,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), UpkeepError> {
        if self.advertise.trim().is_empty() {
            return Err(UpkeepError::InvalidConfig(
                "advertise address cannot be empty".to_string(),
            ));
        }

        if self.discovery.trim().is_empty() {
            return Err(UpkeepError::InvalidConfig(
                "discovery location cannot be empty".to_string(),
            ));
        }

        if self.upkeep_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(UpkeepError::InvalidConfig(
                "upkeep and probe timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_fail_attempts == 0 {
            return Err(UpkeepError::InvalidConfig(
                "max fail attempts must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(UpkeepError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// Parses a duration string such as `"90s"` or `"1h30s"`, falling back to `default` when the
/// value is absent or malformed.
pub fn parse_duration_or(value: Option<&str>, default: Duration) -> Duration {
    match value.map(str::trim) {
        Some(s) if !s.is_empty() => humantime::parse_duration(s).unwrap_or(default),
        _ => default,
    }
}

/// Maps legacy level names (`WARNING`, `FATAL`, `PANIC`) onto tracing levels.
pub fn normalize_log_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_advertise() {
        let config = AgentConfig {
            advertise: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_fail_attempts() {
        let config = AgentConfig {
            max_fail_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AgentConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration_or() {
        assert_eq!(
            parse_duration_or(Some("90s"), DEFAULT_TTL),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration_or(Some("1h30s"), DEFAULT_HEARTBEAT),
            Duration::from_secs(3630)
        );
        assert_eq!(
            parse_duration_or(Some("10ms"), DEFAULT_HEARTBEAT),
            Duration::from_millis(10)
        );
        assert_eq!(parse_duration_or(Some("soon"), DEFAULT_TTL), DEFAULT_TTL);
        assert_eq!(parse_duration_or(Some(""), DEFAULT_TTL), DEFAULT_TTL);
        assert_eq!(parse_duration_or(None, DEFAULT_HEARTBEAT), DEFAULT_HEARTBEAT);
    }

    #[test]
    fn test_normalize_log_level() {
        assert_eq!(normalize_log_level("DEBUG"), "debug");
        assert_eq!(normalize_log_level("WARNING"), "warn");
        assert_eq!(normalize_log_level("FATAL"), "error");
        assert_eq!(normalize_log_level("PANIC"), "error");
        assert_eq!(normalize_log_level("whatever"), "info");
    }

    #[test]
    #[serial]
    fn test_from_env_requires_advertise() {
        env::remove_var("UPKEEP_ADVERTISE");
        env::set_var("UPKEEP_DISCOVERY", "http://etcd:2379");
        assert!(AgentConfig::from_env().is_err());
        env::remove_var("UPKEEP_DISCOVERY");
    }

    #[test]
    #[serial]
    fn test_from_env_with_defaults() {
        for key in [
            "UPKEEP_PROBE",
            "UPKEEP_UPKEEP_TIMEOUT",
            "UPKEEP_PROBE_TIMEOUT",
            "UPKEEP_MAX_FAIL",
            "LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
        env::set_var("UPKEEP_ADVERTISE", "10.0.0.7");
        env::set_var("UPKEEP_DISCOVERY", "http://etcd:2379");

        let config = AgentConfig::from_env().expect("config from env");
        assert_eq!(config.advertise, "10.0.0.7");
        assert_eq!(config.discovery, "http://etcd:2379");
        assert_eq!(config.probe_family, ProbeFamily::Tcp);
        assert_eq!(config.upkeep_timeout, UPKEEP_TIMEOUT);
        assert_eq!(config.probe_timeout, PROBE_TIMEOUT);
        assert_eq!(config.max_fail_attempts, MAX_FAIL_ATTEMPTS);
        assert_eq!(config.log_level, "info");

        env::remove_var("UPKEEP_ADVERTISE");
        env::remove_var("UPKEEP_DISCOVERY");
    }

    #[test]
    #[serial]
    fn test_from_env_maps_legacy_log_level() {
        env::set_var("UPKEEP_ADVERTISE", "10.0.0.7");
        env::set_var("UPKEEP_DISCOVERY", "http://etcd:2379");
        env::set_var("LOG_LEVEL", "WARNING");

        let config = AgentConfig::from_env().expect("config from env");
        assert_eq!(config.log_level, "warn");
        assert!(crate::logger::env_filter(&config.log_level).is_ok());

        env::remove_var("LOG_LEVEL");
        env::remove_var("UPKEEP_ADVERTISE");
        env::remove_var("UPKEEP_DISCOVERY");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_probe() {
        env::set_var("UPKEEP_ADVERTISE", "10.0.0.7");
        env::set_var("UPKEEP_DISCOVERY", "http://etcd:2379");
        env::set_var("UPKEEP_PROBE", "icmp");

        assert!(matches!(
            AgentConfig::from_env(),
            Err(UpkeepError::InvalidConfig(_))
        ));

        for key in ["UPKEEP_ADVERTISE", "UPKEEP_DISCOVERY", "UPKEEP_PROBE"] {
            env::remove_var(key);
        }
    }
}
