mod app;
mod observability;
mod server;
mod sessions;
mod transport;

pub use app::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(error("server.host", "host must not be empty"));
        }
        if !self.server.prefix.starts_with('/') || self.server.prefix.len() < 2 {
            errors.push(error(
                "server.prefix",
                "prefix must start with '/' and name a path segment",
            ));
        } else if self.server.prefix.ends_with('/') {
            errors.push(error("server.prefix", "prefix must not end with '/'"));
        }

        // Session timing: a zero interval would spin the sweep task.
        if self.sessions.timeout_secs == 0 {
            errors.push(error("sessions.timeout_secs", "timeout must be greater than 0"));
        }
        if self.sessions.gc_interval_secs == 0 {
            errors.push(error(
                "sessions.gc_interval_secs",
                "gc interval must be greater than 0",
            ));
        }
        if self.sessions.heartbeat && self.sessions.heartbeat_interval_secs == 0 {
            errors.push(error(
                "sessions.heartbeat_interval_secs",
                "heartbeat interval must be greater than 0 when heartbeats are enabled",
            ));
        }
        for (field, value) in [
            ("sessions.timeout_secs", self.sessions.timeout_secs),
            ("sessions.gc_interval_secs", self.sessions.gc_interval_secs),
            ("sessions.heartbeat_interval_secs", self.sessions.heartbeat_interval_secs),
            ("sessions.acquired_grace_secs", self.sessions.acquired_grace_secs),
        ] {
            if value > MAX_INTERVAL_SECS {
                errors.push(error(
                    field,
                    &format!("must not exceed {MAX_INTERVAL_SECS} seconds (one year)"),
                ));
            }
        }
        if self.sessions.heartbeat
            && self.sessions.heartbeat_interval_secs > self.transport.poll_timeout_secs
            && self.transport.poll_timeout_secs > 0
        {
            errors.push(warning(
                "sessions.heartbeat_interval_secs",
                "heartbeat interval exceeds the poll timeout; idle polls will time out before a heartbeat arrives",
            ));
        }

        if self.transport.poll_timeout_secs == 0 {
            errors.push(error(
                "transport.poll_timeout_secs",
                "poll timeout must be greater than 0",
            ));
        }
        if self.transport.response_limit == 0 {
            errors.push(error(
                "transport.response_limit",
                "response limit must be greater than 0",
            ));
        }

        if self.observability.sample_rate < 0.0 || self.observability.sample_rate > 1.0 {
            errors.push(error(
                "observability.sample_rate",
                "sample rate must be within 0.0..=1.0",
            ));
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

fn error(field: &str, message: &str) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: &str, message: &str) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let issues = Config::default().validate();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn zero_intervals_are_errors() {
        let mut cfg = Config::default();
        cfg.sessions.gc_interval_secs = 0;
        cfg.sessions.timeout_secs = 0;
        let fields: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .map(|e| e.field)
            .collect();
        assert!(fields.contains(&"sessions.gc_interval_secs".to_string()));
        assert!(fields.contains(&"sessions.timeout_secs".to_string()));
    }

    #[test]
    fn oversized_session_timings_are_errors() {
        let mut cfg = Config::default();
        cfg.sessions.gc_interval_secs = u64::MAX;
        cfg.sessions.acquired_grace_secs = 1 << 60;
        cfg.sessions.timeout_secs = MAX_INTERVAL_SECS;
        let fields: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "sessions.gc_interval_secs".to_string(),
                "sessions.acquired_grace_secs".to_string(),
            ]
        );
    }

    #[test]
    fn zero_heartbeat_interval_ignored_when_disabled() {
        let mut cfg = Config::default();
        cfg.sessions.heartbeat = false;
        cfg.sessions.heartbeat_interval_secs = 0;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn prefix_shape_is_checked() {
        for bad in ["echo", "/", "/echo/"] {
            let mut cfg = Config::default();
            cfg.server.prefix = bad.into();
            assert!(
                cfg.validate().iter().any(|e| e.field == "server.prefix"),
                "prefix {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn wildcard_cors_is_a_warning() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert!(issues[0].to_string().starts_with("[WARN] server.cors"));
    }
}
