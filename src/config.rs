use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub live_api: LiveApiConfig,
    pub screen: ScreenConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Microphone sample rate (the model expects 16kHz input)
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample rate of synthesized audio coming back from the model
    pub playback_sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveApiConfig {
    /// WebSocket endpoint of the live conversational model
    pub endpoint: String,
    /// Environment variable holding the API key (never the key itself)
    pub api_key_env: String,
    pub model: String,
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenConfig {
    pub enabled: bool,
    /// Interval between screen stills in milliseconds
    pub capture_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub recordings_path: String,
    /// Duration of each WAV chunk before rotating files
    pub chunk_duration_secs: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Full WebSocket URL including the API key query parameter.
    pub fn live_api_url(&self) -> Result<String> {
        let key = std::env::var(&self.live_api.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "API key environment variable {} is not set",
                self.live_api.api_key_env
            )
        })?;
        Ok(format!("{}?key={}", self.live_api.endpoint, key))
    }
}
