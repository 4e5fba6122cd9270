use crate::channel::DuplexChannel;
use crate::event::EventSender;
use crate::types::AudioFragment;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// The microphone side of a conversation.
///
/// Once acquired, the stream posts `SessionEvent::Capture` chunks to `events` at a
/// fixed cadence until it is paused or released.
#[async_trait(?Send)]
pub trait CaptureSource {
    async fn acquire(&self, events: EventSender) -> Result<Box<dyn CaptureStream>>;
}

#[cfg_attr(test, automock)]
pub trait CaptureStream {
    /// Stops producing chunks; the device stays open.
    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Closes the device.
    fn release(&mut self);
}

/// Forwards captured chunks onto the duplex channel.
///
/// Outbound audio is never buffered: a chunk that cannot be sent right away is stale
/// by the time it could be, so it is dropped.
pub struct CapturePump {
    stream: Option<Box<dyn CaptureStream>>,
    paused: bool,
    forwarded: u64,
    dropped: u64,
}

impl CapturePump {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream: Some(stream),
            paused: false,
            forwarded: 0,
            dropped: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stream.is_none()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.pause()?;
        }
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.resume()?;
        }
        self.paused = false;
        Ok(())
    }

    /// Sends `chunk` as one binary frame. Returns whether it went out.
    pub fn on_chunk(&mut self, chunk: AudioFragment, channel: &mut dyn DuplexChannel) -> bool {
        if self.stream.is_none() || self.paused || chunk.is_empty() {
            self.dropped += 1;
            return false;
        }
        if !channel.is_open() {
            tracing::trace!("channel not open, dropping {} byte chunk", chunk.len());
            self.dropped += 1;
            return false;
        }
        let len = chunk.len();
        match channel.send_binary(chunk) {
            Ok(()) => {
                tracing::trace!("sent {} bytes of audio", len);
                self.forwarded += 1;
                true
            }
            Err(e) => {
                tracing::warn!("failed to send audio chunk: {:#}", e);
                self.dropped += 1;
                false
            }
        }
    }

    /// Releases the capture device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::debug!(
                "capture released ({} chunks sent, {} dropped)",
                self.forwarded,
                self.dropped
            );
        }
    }
}

impl Drop for CapturePump {
    fn drop(&mut self) {
        self.stop();
    }
}
