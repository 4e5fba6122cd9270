pub mod aggregator;
pub mod capture;
pub mod channel;
mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod multiplexer;
#[cfg(feature = "utils")]
pub mod native;
pub mod playback;
pub mod session;

pub use voice_session_types as types;
pub use client::{
    connect_with_config, ChannelConfig, ChannelConfigBuilder, Connection, Stats,
    WsConnector,
};
pub use config::{Config, ConfigError};
pub use error::SessionError;
pub use session::{Activity, EndReason, SessionController, SessionState};

#[cfg(feature = "utils")]
pub use voice_session_utils as utils;
