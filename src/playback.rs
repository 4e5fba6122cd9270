//! Streaming playback buffer.
//!
//! Audio fragments arrive in bursts straight from the network, but a [`PlaybackSink`]
//! accepts a single pending write at a time and reports completion later through a
//! [`PlaybackEvent`](crate::event::PlaybackEvent). [`PlaybackBuffer`] sits between the two:
//! it queues fragments and hands them over one by one, strictly in arrival order.

use crate::event::EventSender;
use crate::types::AudioFragment;
#[cfg(test)]
use mockall::automock;
use std::collections::VecDeque;

/// Identifies one write handed to a sink. Completions echo it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteTicket(u64);

impl WriteTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// An audio output accepting one pending write at a time.
///
/// `write` starts playing a fragment; the sink later posts
/// `PlaybackEvent::WriteFinished` with the same ticket. A cancelled write may or may
/// not report completion, and a sink must stop reporting `busy` once a write is
/// cancelled or finished.
#[cfg_attr(test, automock)]
pub trait PlaybackSink {
    fn write(&mut self, ticket: WriteTicket, fragment: AudioFragment) -> anyhow::Result<()>;

    fn busy(&self) -> bool;

    /// Aborts the write in progress, if any.
    fn cancel_pending(&mut self);

    /// Skips everything already committed to the output so none of it is heard again.
    fn seek_to_end(&mut self);

    /// Releases the underlying output device.
    fn dispose(&mut self);
}

/// Opens a fresh sink for every conversation.
pub trait SinkFactory {
    fn create(&self, events: EventSender) -> anyhow::Result<Box<dyn PlaybackSink>>;
}

pub struct PlaybackBuffer {
    sink: Option<Box<dyn PlaybackSink>>,
    pending: VecDeque<AudioFragment>,
    in_flight: Option<WriteTicket>,
    next_ticket: u64,
}

impl PlaybackBuffer {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink: Some(sink),
            pending: VecDeque::new(),
            in_flight: None,
            next_ticket: 0,
        }
    }

    /// Hands `fragment` to the sink if it is idle, otherwise queues it behind the others.
    pub fn enqueue(&mut self, fragment: AudioFragment) {
        if self.sink.is_none() {
            tracing::debug!("playback torn down, dropping {} byte fragment", fragment.len());
            return;
        }
        self.pending.push_back(fragment);
        self.drain();
    }

    /// Completion signal from the sink.
    pub fn on_write_finished(&mut self, ticket: WriteTicket, result: Result<(), String>) {
        if self.in_flight != Some(ticket) {
            // Completion of a write cancelled by `flush`; the sink may be free again.
            tracing::trace!("ignoring completion of stale write {}", ticket.id());
            self.drain();
            return;
        }
        self.in_flight = None;
        if let Err(e) = result {
            tracing::warn!("sink failed to play write {}, dropping it: {}", ticket.id(), e);
        }
        self.drain();
    }

    /// Discards queued and in-flight audio and skips what the sink already holds.
    pub fn flush(&mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if self.in_flight.take().is_some() {
            sink.cancel_pending();
        }
        sink.seek_to_end();
        tracing::debug!(dropped, "playback flushed");
    }

    /// Drops all queued audio and releases the sink. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.pending.clear();
        if let Some(mut sink) = self.sink.take() {
            if self.in_flight.take().is_some() {
                sink.cancel_pending();
            }
            sink.dispose();
            tracing::debug!("playback sink disposed");
        }
        self.in_flight = None;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> Option<WriteTicket> {
        self.in_flight
    }

    pub fn is_torn_down(&self) -> bool {
        self.sink.is_none()
    }

    fn drain(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        while self.in_flight.is_none() && !sink.busy() {
            let Some(fragment) = self.pending.pop_front() else {
                break;
            };
            let ticket = WriteTicket(self.next_ticket);
            self.next_ticket += 1;
            let len = fragment.len();
            match sink.write(ticket, fragment) {
                Ok(()) => self.in_flight = Some(ticket),
                Err(e) => tracing::warn!("sink rejected {} byte fragment, dropping it: {:#}", len, e),
            }
        }
    }
}

impl Drop for PlaybackBuffer {
    fn drop(&mut self) {
        self.teardown();
    }
}
