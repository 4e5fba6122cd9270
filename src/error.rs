use crate::session::SessionState;

/// Reasons a conversation could not be started.
///
/// Every variant is returned only after the controller has released whatever it had
/// already acquired and gone back to idle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a conversation is already running (state: {0:?})")]
    AlreadyRunning(SessionState),
    #[error("could not open the duplex channel: {0:#}")]
    ChannelUnavailable(anyhow::Error),
    #[error("could not acquire the capture device: {0:#}")]
    DeviceUnavailable(anyhow::Error),
    #[error("could not open the playback sink: {0:#}")]
    SinkUnavailable(anyhow::Error),
}
