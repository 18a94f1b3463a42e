//! Agent configuration.
//!
//! Values are layered: built-in defaults, then a JSON file, then environment
//! variables, then command-line overrides. The resulting [`AgentConfig`] is
//! passed explicitly to every component that needs it.

use crate::error::{AgentError, Result};
use crate::transport::ReconnectOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub agent: AgentSettings,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Collector endpoint and reconnection behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Collector URL (http, https, ws or wss)
    pub url: String,
    /// Reconnect automatically after a lost or failed connection
    pub reconnection: bool,
    /// First reconnect delay in milliseconds
    pub reconnection_delay: u64,
    /// Upper bound for the reconnect delay in milliseconds
    pub reconnection_delay_max: u64,
    /// Maximum reconnect attempts, 0 for unbounded
    pub reconnection_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_string(),
            reconnection: true,
            reconnection_delay: 1000,
            reconnection_delay_max: 5000,
            reconnection_attempts: 0,
        }
    }
}

/// Agent identity and scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Agent identifier, generated when absent
    pub id: Option<String>,
    /// Display name, derived from the hostname when absent
    pub name: Option<String>,
    /// Sampling interval in milliseconds
    pub collect_interval: u64,
    /// Transmission interval in milliseconds
    pub transmit_interval: u64,
    #[serde(rename = "enableGPU")]
    pub enable_gpu: bool,
    /// Number of messages held while the collector is unreachable
    pub buffer_capacity: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            collect_interval: crate::DEFAULT_INTERVAL_MS,
            transmit_interval: crate::DEFAULT_INTERVAL_MS,
            enable_gpu: true,
            buffer_capacity: crate::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Per-category collection toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
    pub gpu: bool,
    pub temperatures: bool,
    pub processes: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
            network: true,
            gpu: true,
            temperatures: true,
            processes: true,
        }
    }
}

impl MetricsConfig {
    fn toggle_mut(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "cpu" => Some(&mut self.cpu),
            "memory" => Some(&mut self.memory),
            "disk" => Some(&mut self.disk),
            "network" => Some(&mut self.network),
            "gpu" => Some(&mut self.gpu),
            "temperatures" => Some(&mut self.temperatures),
            "processes" => Some(&mut self.processes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parse the configured level; accepts `WARNING` as an alias of `WARN`.
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        let level = self.level.trim();
        if level.eq_ignore_ascii_case("warning") {
            return Ok(tracing::Level::WARN);
        }
        level
            .parse()
            .map_err(|_| AgentError::config_error(format!("Unknown log level: {}", self.level)))
    }
}

/// Overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub agent_id: Option<String>,
    pub enable_gpu: Option<bool>,
    pub collect_interval: Option<u64>,
    pub transmit_interval: Option<u64>,
    pub log_level: Option<String>,
}

/// Where the file layer of a loaded configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// The file that was applied, if any
    pub path: Option<PathBuf>,
    /// Discovered files that could not be parsed, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

impl AgentConfig {
    /// Load configuration from every layer.
    ///
    /// An explicit `path` that cannot be read or parsed is an error. Without a
    /// path the standard locations are searched and broken files are skipped.
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = match path {
            Some(path) => (
                Self::load_from_file(path)?,
                ConfigSource {
                    path: Some(path.to_path_buf()),
                    skipped: Vec::new(),
                },
            ),
            None => Self::discover(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        config.resolve_identity();
        config.validate()?;

        Ok((config, source))
    }

    /// Load configuration from a specific JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AgentError::config_error(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            AgentError::config_error(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Standard configuration file locations, in search order.
    pub fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("agent.config.json"), PathBuf::from("config.json")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".servwatch").join("agent.config.json"));
        }
        paths.push(PathBuf::from("/etc/servwatch/agent.config.json"));

        paths
    }

    fn discover() -> (Self, ConfigSource) {
        let mut source = ConfigSource::default();

        for path in Self::default_config_paths() {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => {
                    source.path = Some(path);
                    return (config, source);
                }
                Err(e) => source.skipped.push((path, e.to_string())),
            }
        }

        (Self::default(), source)
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("SERVWATCH_SERVER") {
            self.server.url = url;
        }
        if let Some(id) = lookup("AGENT_ID") {
            self.agent.id = Some(id);
        }
        if let Some(name) = lookup("AGENT_NAME") {
            self.agent.name = Some(name);
        }
        if let Some(value) = lookup("COLLECT_INTERVAL") {
            self.agent.collect_interval = parse_env_number("COLLECT_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("TRANSMIT_INTERVAL") {
            self.agent.transmit_interval = parse_env_number("TRANSMIT_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("ENABLE_GPU") {
            self.agent.enable_gpu = value.eq_ignore_ascii_case("true");
        }
        for category in crate::metrics::MetricCategory::ALL {
            let key = format!("METRIC_{}", category.as_str().to_uppercase());
            if let (Some(value), Some(toggle)) = (lookup(&key), self.metrics.toggle_mut(category.as_str())) {
                *toggle = value.eq_ignore_ascii_case("true");
            }
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply command-line overrides, which take precedence over everything.
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(url) = &overrides.server_url {
            self.server.url = url.clone();
        }
        if let Some(id) = &overrides.agent_id {
            self.agent.id = Some(id.clone());
        }
        if let Some(enable_gpu) = overrides.enable_gpu {
            self.agent.enable_gpu = enable_gpu;
        }
        if let Some(ms) = overrides.collect_interval {
            self.agent.collect_interval = ms;
        }
        if let Some(ms) = overrides.transmit_interval {
            self.agent.transmit_interval = ms;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Fill in a generated id and a hostname-based name when they are unset.
    pub fn resolve_identity(&mut self) {
        if self.agent.id.as_deref().map_or(true, str::is_empty) {
            self.agent.id = Some(format!("agent-{}", uuid::Uuid::new_v4()));
        }
        if self.agent.name.as_deref().map_or(true, str::is_empty) {
            let host = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
            self.agent.name = Some(format!("Agent-{}", host));
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.collector_url()?;

        if self.agent.collect_interval == 0 {
            return Err(AgentError::config_error("collectInterval must be greater than zero"));
        }
        if self.agent.transmit_interval == 0 {
            return Err(AgentError::config_error("transmitInterval must be greater than zero"));
        }
        if self.agent.buffer_capacity == 0 {
            return Err(AgentError::config_error("bufferCapacity must be greater than zero"));
        }
        self.logging.tracing_level()?;

        Ok(())
    }

    pub fn agent_id(&self) -> &str {
        self.agent.id.as_deref().unwrap_or_default()
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name.as_deref().unwrap_or_default()
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.agent.collect_interval)
    }

    pub fn transmit_interval(&self) -> Duration {
        Duration::from_millis(self.agent.transmit_interval)
    }

    /// GPU collection needs both the agent switch and the category toggle.
    pub fn gpu_enabled(&self) -> bool {
        self.agent.enable_gpu && self.metrics.gpu
    }

    /// Category toggles with the GPU switch folded in.
    pub fn effective_metrics(&self) -> MetricsConfig {
        MetricsConfig {
            gpu: self.gpu_enabled(),
            ..self.metrics
        }
    }

    /// The collector base URL for the Socket.IO client.
    ///
    /// `ws(s)://` is accepted and mapped to `http(s)://`; the client appends
    /// the `/socket.io/` Engine.IO path itself when the URL has none.
    pub fn collector_url(&self) -> Result<String> {
        let url = self.server.url.trim();
        if url.is_empty() {
            return Err(AgentError::config_error("server.url must not be empty"));
        }

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| AgentError::config_error(format!("server.url has no scheme: {}", url)))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => {
                return Err(AgentError::config_error(format!(
                    "Unsupported server.url scheme: {}",
                    other
                )))
            }
        };
        if rest.is_empty() || rest.starts_with('/') {
            return Err(AgentError::config_error(format!("server.url has no host: {}", url)));
        }

        Ok(format!("{}://{}", scheme, rest))
    }

    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            enabled: self.server.reconnection,
            initial_delay: Duration::from_millis(self.server.reconnection_delay),
            max_delay: Duration::from_millis(self.server.reconnection_delay_max),
            max_attempts: self.server.reconnection_attempts,
        }
    }

    /// Set the collector URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server.url = url.into();
        self
    }

    /// Set the agent id.
    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent.id = Some(id.into());
        self
    }

    /// Set the sampling and transmission intervals in milliseconds.
    pub fn with_intervals(mut self, collect_ms: u64, transmit_ms: u64) -> Self {
        self.agent.collect_interval = collect_ms;
        self.agent.transmit_interval = transmit_ms;
        self
    }

    /// Set the outbound buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.agent.buffer_capacity = capacity;
        self
    }
}

fn parse_env_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentError::config_error(format!("{} must be a number, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.server.url, "http://localhost:3001");
        assert_eq!(config.agent.collect_interval, 1000);
        assert_eq!(config.agent.transmit_interval, 1000);
        assert_eq!(config.agent.buffer_capacity, 100);
        assert!(config.agent.enable_gpu);
        assert!(config.metrics.processes);
        assert_eq!(config.server.reconnection_delay, 1000);
        assert_eq!(config.server.reconnection_delay_max, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "server": { "url": "https://collector.example:8443" },
            "agent": { "collectInterval": 250, "enableGPU": false },
            "metrics": { "processes": false }
        }"#;

        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.url, "https://collector.example:8443");
        assert!(config.server.reconnection);
        assert_eq!(config.agent.collect_interval, 250);
        assert_eq!(config.agent.transmit_interval, 1000);
        assert!(!config.agent.enable_gpu);
        assert!(!config.metrics.processes);
        assert!(config.metrics.cpu);
        assert_eq!(config.logging.level, "INFO");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("servwatch-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{ "agent": { "id": "from-file", "transmitInterval": 5000 } }"#).unwrap();

        let config = AgentConfig::load_from_file(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.agent_id(), "from-file");
        assert_eq!(config.transmit_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_broken_file_fails() {
        let path = std::env::temp_dir().join(format!("servwatch-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{ not json").unwrap();

        let result = AgentConfig::load_from_file(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[
                ("SERVWATCH_SERVER", "http://10.0.0.5:3001"),
                ("AGENT_ID", "env-agent"),
                ("COLLECT_INTERVAL", "500"),
                ("TRANSMIT_INTERVAL", "2000"),
                ("ENABLE_GPU", "FALSE"),
                ("METRIC_PROCESSES", "false"),
                ("METRIC_DISK", "true"),
                ("LOG_LEVEL", "DEBUG"),
            ]))
            .unwrap();

        assert_eq!(config.server.url, "http://10.0.0.5:3001");
        assert_eq!(config.agent_id(), "env-agent");
        assert_eq!(config.agent.collect_interval, 500);
        assert_eq!(config.agent.transmit_interval, 2000);
        assert!(!config.agent.enable_gpu);
        assert!(!config.metrics.processes);
        assert!(config.metrics.disk);
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = AgentConfig::default();
        let result = config.apply_env(env(&[("COLLECT_INTERVAL", "fast")]));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_cli_overrides_win_over_env() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[("SERVWATCH_SERVER", "http://env:1"), ("AGENT_ID", "env")]))
            .unwrap();
        config.apply_overrides(&CliOverrides {
            server_url: Some("http://cli:2".to_string()),
            enable_gpu: Some(false),
            ..Default::default()
        });

        assert_eq!(config.server.url, "http://cli:2");
        assert_eq!(config.agent_id(), "env");
        assert!(!config.gpu_enabled());
        assert!(!config.effective_metrics().gpu);
    }

    #[test]
    fn test_resolve_identity_generates_id_and_name() {
        let mut config = AgentConfig::default();
        config.resolve_identity();

        assert!(config.agent_id().starts_with("agent-"));
        assert!(config.agent_name().starts_with("Agent-"));

        let mut named = AgentConfig::default().with_agent_id("fixed");
        named.resolve_identity();
        assert_eq!(named.agent_id(), "fixed");
    }

    #[test]
    fn test_collector_url_mapping() {
        assert_eq!(AgentConfig::default().collector_url().unwrap(), "http://localhost:3001");

        let config = AgentConfig::default().with_server_url("https://collector:443/agents");
        assert_eq!(config.collector_url().unwrap(), "https://collector:443/agents");

        let config = AgentConfig::default().with_server_url("ws://127.0.0.1:9000");
        assert_eq!(config.collector_url().unwrap(), "http://127.0.0.1:9000");

        let config = AgentConfig::default().with_server_url("WSS://collector.local");
        assert_eq!(config.collector_url().unwrap(), "https://collector.local");

        assert!(AgentConfig::default().with_server_url("http://").validate().is_err());

        assert!(AgentConfig::default().with_server_url("ftp://x").validate().is_err());
        assert!(AgentConfig::default().with_server_url("localhost").validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(AgentConfig::default().with_intervals(0, 100).validate().is_err());
        assert!(AgentConfig::default().with_intervals(100, 0).validate().is_err());
        assert!(AgentConfig::default().with_buffer_capacity(0).validate().is_err());

        let mut config = AgentConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_warning_level_alias() {
        let logging = LoggingConfig {
            level: "WARNING".to_string(),
        };
        assert_eq!(logging.tracing_level().unwrap(), tracing::Level::WARN);
    }
}
