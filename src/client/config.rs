use crate::client::consts::{DEFAULT_CAPACITY, DEFAULT_URL, TOKEN_VAR, URL_VAR};
use secrecy::SecretString;

/// Where and how to open the duplex channel.
#[derive(Debug)]
pub struct ChannelConfig {
    url: String,
    token: Option<SecretString>,
    capacity: usize,
}

pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChannelConfig::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.config.token = Some(SecretString::from(token.to_string()));
        self
    }

    pub fn without_token(mut self) -> Self {
        self.config.token = None;
        self
    }

    /// Number of outbound frames that may wait for the socket before chunks are dropped.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> ChannelConfig {
        self.config
    }
}

impl Default for ChannelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConfig {
    /// Defaults, with the URL and token taken from the environment when set.
    pub fn new() -> Self {
        Self {
            url: std::env::var(URL_VAR).unwrap_or_else(|_| DEFAULT_URL.to_string()),
            token: std::env::var(TOKEN_VAR)
                .ok()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::new()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}
