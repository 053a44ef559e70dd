//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (`HOST`, `PORT`, `OPENAI_API_KEY`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_REALTIME__VOICE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names that
//! contain an underscore (`api_key`, `idle_timeout_secs`) survive the mapping.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub analysis: AnalysisConfig,
    pub session: SessionLimitsConfig,
    pub performance: PerformanceConfig,
    pub store: StoreConfig,
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

/// Upstream realtime voice service settings.
///
/// ## Fields:
/// - `url` / `model`: the WebSocket endpoint; the model is sent as a query parameter
/// - `api_key`: bearer credential presented on connect
/// - `voice`, `audio_format`, `transcription_model`: copied into every session config
/// - `turn_detection`: server-side voice activity detection thresholds
/// - `connect_timeout_secs`: how long to wait for the upstream handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub voice: String,
    pub audio_format: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    pub connect_timeout_secs: u64,
}

/// Server VAD tuning. Upstream uses these to cut continuous audio into turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    /// Activation threshold, 0.0 to 1.0. Higher needs louder speech.
    pub threshold: f64,
    /// Audio kept before detected speech starts
    pub prefix_padding_ms: u32,
    /// Silence needed before a turn is considered finished
    pub silence_duration_ms: u32,
}

/// Post-call analysis service (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

/// Optional limits on a single call.
///
/// Both limits are disabled by default: nothing in the call flow implies a
/// sensible value, so operators opt in explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLimitsConfig {
    /// End the call when the client sends nothing for this long
    pub idle_timeout_secs: Option<u64>,
    /// End the call when it has lasted this long
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Calls running at once; upgrades beyond this are rejected with 503
    pub max_concurrent_sessions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// TOML file with `[[scripts]]` and `[[personas]]` loaded at startup
    pub seed_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            realtime: RealtimeConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
                api_key: String::new(),
                voice: "alloy".to_string(),
                audio_format: "pcm16".to_string(),
                transcription_model: "whisper-1".to_string(),
                turn_detection: TurnDetectionConfig {
                    threshold: 0.5,
                    prefix_padding_ms: 300,
                    silence_duration_ms: 500,
                },
                connect_timeout_secs: 10,
            },
            analysis: AnalysisConfig {
                url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o".to_string(),
                api_key: String::new(),
                temperature: 0.7,
                request_timeout_secs: 60,
            },
            session: SessionLimitsConfig::default(),
            performance: PerformanceConfig {
                max_concurrent_sessions: 50,
            },
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_REALTIME__VOICE=verse`: Override the persona voice
    /// - `APP_SESSION__IDLE_TIMEOUT_SECS=120`: Enable the idle timeout
    /// - `PORT=3000`, `HOST=0.0.0.0`: Special cases for deployment platforms
    /// - `OPENAI_API_KEY=sk-...`: Used for both realtime and analysis
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings
                .set_override("realtime.api_key", key.clone())?
                .set_override("analysis.api_key", key)?;
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

        let threshold = self.realtime.turn_detection.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow::anyhow!(
                "Turn detection threshold must be between 0.0 and 1.0, got {}",
                threshold
            ));
        }

        if self.realtime.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Realtime connect timeout must be greater than 0"));
        }

        if self.analysis.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Analysis request timeout must be greater than 0"));
        }

        if self.session.idle_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("Idle timeout must be greater than 0 when set"));
        }

        if self.session.max_duration_secs == Some(0) {
            return Err(anyhow::anyhow!("Max call duration must be greater than 0 when set"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Only the fields present in the JSON change. Connection endpoints and
    /// credentials are fixed at startup and cannot be changed here; every new
    /// call picks up the updated voice, turn detection and limits.
    ///
    /// ## Example:
    /// `{"session": {"idle_timeout_secs": 90}, "realtime": {"voice": "verse"}}`
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(realtime) = partial_config.get("realtime") {
            if let Some(voice) = realtime.get("voice").and_then(|v| v.as_str()) {
                self.realtime.voice = voice.to_string();
            }
            if let Some(vad) = realtime.get("turn_detection") {
                let turn_detection = &mut self.realtime.turn_detection;
                if let Some(threshold) = vad.get("threshold").and_then(|v| v.as_f64()) {
                    turn_detection.threshold = threshold;
                }
                if let Some(padding) = vad.get("prefix_padding_ms").and_then(|v| v.as_u64()) {
                    turn_detection.prefix_padding_ms = u32::try_from(padding)
                        .map_err(|_| anyhow::anyhow!("prefix_padding_ms out of range: {}", padding))?;
                }
                if let Some(silence) = vad.get("silence_duration_ms").and_then(|v| v.as_u64()) {
                    turn_detection.silence_duration_ms = u32::try_from(silence)
                        .map_err(|_| anyhow::anyhow!("silence_duration_ms out of range: {}", silence))?;
                }
            }
        }

        // `null` switches a limit off again
        if let Some(session) = partial_config.get("session") {
            if let Some(idle) = session.get("idle_timeout_secs") {
                self.session.idle_timeout_secs = idle.as_u64();
            }
            if let Some(max) = session.get("max_duration_secs") {
                self.session.max_duration_secs = max.as_u64();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = usize::try_from(sessions)
                    .map_err(|_| anyhow::anyhow!("max_concurrent_sessions out of range: {}", sessions))?;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl SessionLimitsConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}
