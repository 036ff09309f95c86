//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_SERVER__PORT, etc. —
//!    double underscore between section and field)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub streaming: StreamingConfig,
    pub evaluation: EvaluationConfig,
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

/// Audio pipeline settings.
///
/// ## Fields:
/// - `input_sample_rate`: rate of microphone audio sent upstream (Hz)
/// - `output_sample_rate`: rate of synthesized audio coming back (Hz)
/// - `capture_block_size`: samples accumulated before a capture block ships
/// - `channels`: channel count of inbound microphone audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_block_size: usize,
    pub channels: usize,
}

/// Upstream realtime voice endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// WebSocket URL of the bidirectional voice service.
    pub url: String,
}

/// Post-call evaluation endpoint settings.
///
/// The API key is read from `APP_EVALUATION__API_KEY`; it never belongs in
/// config.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Optional JSON-lines file for correction examples. In-memory when
    /// unset.
    pub corrections_path: Option<String>,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_calls: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                capture_block_size: 4096,
                channels: 1,
            },
            streaming: StreamingConfig {
                url: "ws://localhost:9090/v1/realtime".to_string(),
            },
            evaluation: EvaluationConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
                api_key: String::new(),
                corrections_path: Some("corrections.jsonl".to_string()),
            },
            performance: PerformanceConfig {
                max_concurrent_calls: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_EVALUATION__API_KEY=sk-...`: Evaluation endpoint credentials
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// Field names contain underscores of their own (`api_key`,
    /// `input_sample_rate`), so the section/field split uses a double
    /// underscore; a single one would cut the field name apart.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms commonly inject these without the APP_ prefix.
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

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.capture_block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.performance.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        if self.streaming.url.is_empty() {
            return Err(anyhow::anyhow!("Streaming URL cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Partial updates are allowed: `{"server": {"port": 9000}}` changes only
    /// the port. The merged result is re-validated before it takes effect.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("input_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.input_sample_rate = rate as u32;
            }
            if let Some(rate) = audio.get("output_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.output_sample_rate = rate as u32;
            }
            if let Some(block) = audio.get("capture_block_size").and_then(|v| v.as_u64()) {
                self.audio.capture_block_size = block as usize;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = channels as usize;
            }
        }

        if let Some(streaming) = partial_config.get("streaming") {
            if let Some(url) = streaming.get("url").and_then(|v| v.as_str()) {
                self.streaming.url = url.to_string();
            }
        }

        if let Some(evaluation) = partial_config.get("evaluation") {
            if let Some(base_url) = evaluation.get("base_url").and_then(|v| v.as_str()) {
                self.evaluation.base_url = base_url.to_string();
            }
            if let Some(model) = evaluation.get("model").and_then(|v| v.as_str()) {
                self.evaluation.model = model.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(calls) = performance.get("max_concurrent_calls").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_calls = calls as usize;
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
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.capture_block_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.capture_block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "audio": {"output_sample_rate": 48000}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.audio.output_sample_rate, 48_000);
        // Untouched fields keep their values.
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.input_sample_rate, 16_000);
    }

    #[test]
    fn test_update_rejects_invalid_merge() {
        let mut config = AppConfig::default();
        let json = r#"{"performance": {"max_concurrent_calls": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_env_vars_reach_multi_word_fields() {
        // Fields like api_key carry their own underscore, so the env mapping
        // must split on the double underscore only.
        std::env::set_var("APP_EVALUATION__API_KEY", "sk-test-123");
        std::env::set_var("APP_AUDIO__CAPTURE_BLOCK_SIZE", "2048");

        let config = AppConfig::load().unwrap();

        std::env::remove_var("APP_EVALUATION__API_KEY");
        std::env::remove_var("APP_AUDIO__CAPTURE_BLOCK_SIZE");

        assert_eq!(config.evaluation.api_key, "sk-test-123");
        assert_eq!(config.audio.capture_block_size, 2048);
    }
}
