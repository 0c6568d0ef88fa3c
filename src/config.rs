//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables, nested with a double underscore:
//!    `APP_SERVER__PORT=3000`, `APP_PIPELINE__ONCE_DELAY_MS=20`
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impl)

use crate::session::SessionMode;
use crate::transcription::PipelineTiming;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub pipeline: PipelineConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// WebSocket endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Route the audio stream is served on
    pub path: String,
    /// Text frame sent once right after a client connects
    pub greeting: String,
    /// Mode used when the client does not pass `?mode=`
    pub default_mode: SessionMode,
    pub heartbeat_interval_secs: u64,
    /// Connections silent for longer than this are dropped
    pub client_timeout_secs: u64,
}

/// Whether the chunk counter is shared by all sessions or owned by each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    Global,
    Session,
}

/// Simulated pipeline latencies and worker pool size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub once_delay_ms: u64,
    pub stream_delay_ms: u64,
    pub word_delay_ms: u64,
    /// Upper bound on pipeline tasks running at the same time
    pub max_in_flight: usize,
    pub counter_scope: CounterScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            websocket: WebSocketConfig {
                path: "/audio-stream".to_string(),
                greeting: "Connected to transcription service".to_string(),
                default_mode: SessionMode::Once,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            pipeline: PipelineConfig {
                once_delay_ms: 50,
                stream_delay_ms: 100,
                word_delay_ms: 200,
                max_in_flight: 64,
                counter_scope: CounterScope::Global,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
            },
        }
    }
}

impl PipelineConfig {
    pub fn to_timing(&self) -> PipelineTiming {
        PipelineTiming {
            once_delay: Duration::from_millis(self.once_delay_ms),
            stream_delay: Duration::from_millis(self.stream_delay_ms),
            word_delay: Duration::from_millis(self.word_delay_ms),
        }
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.pipeline.max_in_flight == 0 {
            return Err(anyhow::anyhow!("Pipeline max_in_flight must be greater than 0"));
        }

        if !self.websocket.path.starts_with('/') || self.websocket.path.len() < 2 {
            return Err(anyhow::anyhow!(
                "WebSocket path must start with '/' and name a route, got '{}'",
                self.websocket.path
            ));
        }

        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.websocket.client_timeout_secs,
                self.websocket.heartbeat_interval_secs
            ));
        }

        Ok(())
    }

    /// Apply a partial runtime update from JSON.
    ///
    /// Only settings that take effect without a restart are accepted:
    /// `performance.max_concurrent_sessions` and `websocket.default_mode`.
    /// Unknown or restart-only fields are ignored.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        if let Some(websocket) = partial_config.get("websocket") {
            if let Some(mode) = websocket.get("default_mode").and_then(|v| v.as_str()) {
                self.websocket.default_mode = mode.parse().map_err(anyhow::Error::msg)?;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.websocket.path, "/audio-stream");
        assert_eq!(config.websocket.greeting, "Connected to transcription service");
        assert_eq!(config.pipeline.counter_scope, CounterScope::Global);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timing_matches_pipeline_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.to_timing(), PipelineTiming::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.websocket.path = "audio".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.websocket.client_timeout_secs = config.websocket.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"performance": {"max_concurrent_sessions": 5}, "websocket": {"default_mode": "progressive"}}"#;
        config.update_from_json(json).unwrap();

        assert_eq!(config.performance.max_concurrent_sessions, 5);
        assert_eq!(config.websocket.default_mode, SessionMode::Progressive);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config
            .update_from_json(r#"{"performance": {"max_concurrent_sessions": 0}}"#)
            .is_err());
        assert!(config
            .update_from_json(r#"{"websocket": {"default_mode": "batch"}}"#)
            .is_err());
        assert!(config.update_from_json("not json").is_err());
    }

    #[test]
    fn test_config_deserializes_from_toml_source() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [websocket]
            path = "/ws"
            greeting = "hi"
            default_mode = "continuous"
            heartbeat_interval_secs = 5
            client_timeout_secs = 10

            [pipeline]
            once_delay_ms = 1
            stream_delay_ms = 2
            word_delay_ms = 3
            max_in_flight = 4
            counter_scope = "session"

            [performance]
            max_concurrent_sessions = 7
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.websocket.default_mode, SessionMode::Continuous);
        assert_eq!(config.pipeline.counter_scope, CounterScope::Session);
        assert_eq!(config.performance.max_concurrent_sessions, 7);
        assert!(config.validate().is_ok());
    }
}
