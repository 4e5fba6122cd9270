use crate::client::Stats;
use crate::event::EventSender;
use crate::types::AudioFragment;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// Opens the duplex channel to the voice service.
///
/// Inbound frames, close and error notifications are posted to `events` as
/// [`ChannelEvent`](crate::event::ChannelEvent)s for as long as the channel lives.
#[async_trait(?Send)]
pub trait Connector {
    async fn connect(&self, events: EventSender) -> Result<Box<dyn DuplexChannel>>;
}

/// Outbound half of an open duplex channel.
///
/// Implementations must stop posting events once `close` has been called or the
/// value is dropped.
#[cfg_attr(test, automock)]
pub trait DuplexChannel {
    fn is_open(&self) -> bool;

    fn send_binary(&mut self, fragment: AudioFragment) -> Result<()>;

    fn close(&mut self);

    fn stats(&self) -> Option<Stats> {
        None
    }
}
