use crate::client::consts::{DEFAULT_URL, TOKEN_VAR, URL_VAR};
use crate::client::ChannelConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::Level;

/// Capture cadence; the service expects a chunk roughly every quarter second.
pub const DEFAULT_CHUNK_MS: u32 = 250;
pub const DEFAULT_WIRE_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the `voice-session` binary, loaded once at startup.
#[derive(Debug)]
pub struct Config {
    pub url: String,
    pub token: Option<SecretString>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub chunk_ms: u32,
    pub wire_sample_rate: u32,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from the environment, after reading `.env` if present.
    ///
    /// *   `VOICE_SESSION_URL`: (Optional) WebSocket endpoint. Defaults to `ws://localhost:8000/listen`.
    /// *   `VOICE_SESSION_TOKEN`: (Optional) Sent as a bearer token when set.
    /// *   `INPUT_DEVICE` / `OUTPUT_DEVICE`: (Optional) Device names; the host defaults otherwise.
    /// *   `CAPTURE_CHUNK_MS`: (Optional) Capture chunk length. Defaults to 250.
    /// *   `WIRE_SAMPLE_RATE`: (Optional) PCM16 rate on the wire. Defaults to 24000.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(URL_VAR).unwrap_or_else(|| DEFAULT_URL.to_string());
        validate_url(&url)?;

        let token = lookup(TOKEN_VAR)
            .filter(|t| !t.is_empty())
            .map(SecretString::from);

        let input_device = lookup("INPUT_DEVICE").filter(|d| !d.is_empty());
        let output_device = lookup("OUTPUT_DEVICE").filter(|d| !d.is_empty());

        let chunk_ms = parse_positive(&lookup, "CAPTURE_CHUNK_MS", DEFAULT_CHUNK_MS)?;
        let wire_sample_rate = parse_positive(&lookup, "WIRE_SAMPLE_RATE", DEFAULT_WIRE_SAMPLE_RATE)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            url,
            token,
            input_device,
            output_device,
            chunk_ms,
            wire_sample_rate,
            log_level,
        })
    }

    /// Replaces the endpoint, e.g. from the command line. Checked like `VOICE_SESSION_URL`.
    pub fn set_url(&mut self, url: String) -> Result<(), ConfigError> {
        validate_url(&url)?;
        self.url = url;
        Ok(())
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let builder = ChannelConfig::builder().with_url(&self.url);
        match &self.token {
            Some(token) => builder.with_token(token.expose_secret()).build(),
            None => builder.without_token().build(),
        }
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            URL_VAR.to_string(),
            format!("'{}' is not a ws:// or wss:// URL", url),
        ))
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a positive integer", raw),
        )),
    }
}
