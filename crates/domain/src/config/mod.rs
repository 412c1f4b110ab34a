mod observability;
mod server;
mod store;
mod stream;

pub use observability::*;
pub use server::*;
pub use store::*;
pub use stream::*;

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
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a TOML document and layer environment overrides on top.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        let mut config: Config =
            toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.apply_env();
        Ok(config)
    }

    /// Apply process environment overrides.
    pub fn apply_env(&mut self) {
        self.store.apply_env();
    }
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

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
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
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.mode == ServerMode::MultiTenant
            && self.server.cors.allowed_origins.iter().any(|o| o == "*")
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "multi_tenant mode with wildcard \"*\" lets any page call the API",
            ));
        }
        if self.server.mode == ServerMode::MultiTenant && self.store.backend == BackendChoice::Memory
        {
            errors.push(ConfigError::warning(
                "store.backend",
                "multi_tenant mode with the memory backend loses every API key on restart",
            ));
        }

        if self.store.event_retention_days == 0 {
            errors.push(ConfigError::warning(
                "store.event_retention_days",
                "0 prunes every stored event on startup; replay after restart will be empty",
            ));
        }
        if let Some(path) = &self.store.path {
            if path.as_os_str().is_empty() {
                errors.push(ConfigError::error("store.path", "path must not be empty"));
            }
        }

        if self.stream.keep_alive_secs == 0 {
            errors.push(ConfigError::error(
                "stream.keep_alive_secs",
                "keep-alive interval must be greater than 0",
            ));
        }
        if self.stream.replay_limit == 0 {
            errors.push(ConfigError::warning(
                "stream.replay_limit",
                "0 disables replay; reconnecting clients will miss events",
            ));
        }
        if self.stream.buffer == 0 {
            errors.push(ConfigError::error(
                "stream.buffer",
                "per-connection buffer must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Error);
        assert_eq!(issues[0].field, "server.port");
    }

    #[test]
    fn multi_tenant_on_memory_warns() {
        let mut cfg = Config::default();
        cfg.server.mode = ServerMode::MultiTenant;
        cfg.store.backend = BackendChoice::Memory;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "store.backend" && i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn sample_rate_out_of_range() {
        let mut cfg = Config::default();
        cfg.observability.sample_rate = 1.5;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "observability.sample_rate"));
    }

    #[test]
    fn display_tags_severity() {
        let e = ConfigError::warning("stream.replay_limit", "zero");
        assert_eq!(e.to_string(), "[WARN] stream.replay_limit: zero");
    }
}
