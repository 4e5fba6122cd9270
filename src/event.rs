use crate::playback::WriteTicket;
use crate::types::{AudioFragment, InboundFrame};

pub type EventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionEvent>;

/// Everything a running conversation reacts to.
///
/// Collaborators (channel reader, capture device, playback sink) post these into the
/// session's queue; the controller handles them one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    /// A captured chunk is ready to be sent.
    Capture(AudioFragment),
    Playback(PlaybackEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(InboundFrame),
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The sink finished (or failed) the write identified by `ticket`.
    WriteFinished {
        ticket: WriteTicket,
        result: Result<(), String>,
    },
}

impl SessionEvent {
    pub fn frame(frame: InboundFrame) -> Self {
        Self::Channel(ChannelEvent::Frame(frame))
    }

    pub fn write_finished(ticket: WriteTicket) -> Self {
        Self::Playback(PlaybackEvent::WriteFinished {
            ticket,
            result: Ok(()),
        })
    }

    pub fn write_failed(ticket: WriteTicket, reason: impl Into<String>) -> Self {
        Self::Playback(PlaybackEvent::WriteFinished {
            ticket,
            result: Err(reason.into()),
        })
    }
}
