//! The conversation lifecycle.
//!
//! [`SessionController`] owns every resource of a running conversation and is the only
//! consumer of its event queue. Collaborators never call back into the controller;
//! they post [`SessionEvent`]s which are handled one at a time.

use crate::aggregator::{reduce, Conversation, TranscriptEvent};
use crate::capture::{CapturePump, CaptureSource};
use crate::channel::{Connector, DuplexChannel};
use crate::client::Stats;
use crate::error::SessionError;
use crate::event::{ChannelEvent, EventReceiver, PlaybackEvent, SessionEvent};
use crate::multiplexer::{classify, dispatch, Directive};
use crate::playback::{PlaybackBuffer, SinkFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Listening,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active(Activity),
    Ending,
}

/// Why the last conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The service sent `finish`.
    Finished,
    UserRequested,
    ChannelClosed(Option<String>),
    ChannelError(String),
}

struct ActiveSession {
    channel: Box<dyn DuplexChannel>,
    capture: CapturePump,
    playback: PlaybackBuffer,
    events: EventReceiver,
}

impl ActiveSession {
    fn teardown(mut self) -> Option<Stats> {
        let stats = self.channel.stats();
        self.channel.close();
        self.capture.stop();
        self.playback.teardown();
        self.events.close();
        stats
    }
}

pub struct SessionController<C, A, F> {
    connector: C,
    capture_source: A,
    sinks: F,
    state: SessionState,
    conversation: Conversation,
    active: Option<ActiveSession>,
    last_end: Option<EndReason>,
}

impl<C, A, F> SessionController<C, A, F>
where
    C: Connector,
    A: CaptureSource,
    F: SinkFactory,
{
    pub fn new(connector: C, capture_source: A, sinks: F) -> Self {
        Self {
            connector,
            capture_source,
            sinks,
            state: SessionState::Idle,
            conversation: Conversation::default(),
            active: None,
            last_end: None,
        }
    }

    /// Opens the channel, acquires the microphone and the playback sink, then starts
    /// listening.
    ///
    /// Either everything is acquired or nothing is: on failure whatever was already
    /// opened is released and the controller is back to [`SessionState::Idle`].
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyRunning(self.state));
        }

        self.conversation = reduce(std::mem::take(&mut self.conversation), TranscriptEvent::Reset);
        self.state = SessionState::Connecting;
        tracing::info!("starting conversation");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let mut channel = match self.connector.connect(tx.clone()).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!("failed to open channel: {:#}", e);
                self.state = SessionState::Idle;
                return Err(SessionError::ChannelUnavailable(e));
            }
        };

        let mut capture = match self.capture_source.acquire(tx.clone()).await {
            Ok(stream) => CapturePump::new(stream),
            Err(e) => {
                tracing::error!("failed to acquire capture device: {:#}", e);
                channel.close();
                self.state = SessionState::Idle;
                return Err(SessionError::DeviceUnavailable(e));
            }
        };

        let playback = match self.sinks.create(tx) {
            Ok(sink) => PlaybackBuffer::new(sink),
            Err(e) => {
                tracing::error!("failed to open playback sink: {:#}", e);
                capture.stop();
                channel.close();
                self.state = SessionState::Idle;
                return Err(SessionError::SinkUnavailable(e));
            }
        };

        self.active = Some(ActiveSession {
            channel,
            capture,
            playback,
            events: rx,
        });
        self.state = SessionState::Active(Activity::Listening);
        self.last_end = None;
        tracing::info!("conversation started, listening");
        Ok(())
    }

    /// Ends the conversation at the user's request. Safe in any state.
    pub fn end(&mut self) {
        self.end_with(EndReason::UserRequested);
    }

    fn end_with(&mut self, reason: EndReason) {
        let Some(session) = self.active.take() else {
            // A start() that was dropped mid-acquisition leaves Connecting behind.
            if self.state != SessionState::Idle {
                tracing::debug!("resetting stale {:?} state", self.state);
                self.state = SessionState::Idle;
            }
            return;
        };

        self.state = SessionState::Ending;
        if let Some(stats) = session.teardown() {
            tracing::info!(
                "channel stats: {} frames / {} bytes sent, {} text + {} binary frames / {} bytes received",
                stats.frames_sent(),
                stats.bytes_sent(),
                stats.text_frames_received(),
                stats.binary_frames_received(),
                stats.bytes_received()
            );
        }
        self.state = SessionState::Idle;
        tracing::info!("conversation ended: {:?}", reason);
        self.last_end = Some(reason);
    }

    /// Pauses or resumes the microphone. Returns whether the session is listening
    /// afterwards; does nothing outside an active conversation.
    pub fn toggle_listening(&mut self) -> bool {
        let SessionState::Active(activity) = self.state else {
            return false;
        };
        let Some(session) = self.active.as_mut() else {
            return false;
        };

        let next = match activity {
            Activity::Listening => session.capture.pause().map(|_| Activity::Paused),
            Activity::Paused => session.capture.resume().map(|_| Activity::Listening),
        };
        match next {
            Ok(next) => {
                tracing::info!("capture {:?}", next);
                self.state = SessionState::Active(next);
            }
            Err(e) => tracing::warn!("failed to toggle capture: {:#}", e),
        }
        self.is_listening()
    }

    /// Drops whatever assistant audio is queued or playing.
    pub fn skip_audio(&mut self) {
        if let Some(session) = self.active.as_mut() {
            tracing::debug!("skipping {} queued fragments", session.playback.pending_len());
            session.playback.flush();
        }
    }

    /// Waits for the next event of the running conversation.
    ///
    /// Returns `None` when no conversation is running. If every producer went away
    /// the conversation is ended as closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let session = self.active.as_mut()?;
        let event = session.events.recv().await;
        if event.is_none() {
            tracing::warn!("event queue closed");
            self.end_with(EndReason::ChannelClosed(None));
        }
        event
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        let Some(session) = self.active.as_mut() else {
            tracing::trace!("ignoring event outside a conversation: {:?}", event);
            return;
        };

        let end = match event {
            SessionEvent::Channel(ChannelEvent::Frame(frame)) => {
                match dispatch(classify(frame), &mut session.playback, &mut self.conversation) {
                    Directive::Continue => None,
                    Directive::EndConversation => Some(EndReason::Finished),
                }
            }
            SessionEvent::Channel(ChannelEvent::Closed(reason)) => {
                tracing::warn!("channel closed by peer: {:?}", reason);
                Some(EndReason::ChannelClosed(reason))
            }
            SessionEvent::Channel(ChannelEvent::Error(e)) => {
                tracing::error!("channel error: {}", e);
                Some(EndReason::ChannelError(e))
            }
            SessionEvent::Capture(chunk) => {
                session.capture.on_chunk(chunk, session.channel.as_mut());
                None
            }
            SessionEvent::Playback(PlaybackEvent::WriteFinished { ticket, result }) => {
                session.playback.on_write_finished(ticket, result);
                None
            }
        };

        if let Some(reason) = end {
            self.end_with(reason);
        }
    }

    /// Handles events until the conversation ends.
    pub async fn run(&mut self) -> Option<&EndReason> {
        while let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
        self.last_end.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == SessionState::Active(Activity::Listening)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn last_end(&self) -> Option<&EndReason> {
        self.last_end.as_ref()
    }

    pub fn channel_stats(&self) -> Option<Stats> {
        self.active.as_ref().and_then(|session| session.channel.stats())
    }
}

impl<C, A, F> Drop for SessionController<C, A, F> {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureStream, MockCaptureStream};
    use crate::event::EventSender;
    use crate::playback::tests::{RecordingSink, SinkLog};
    use crate::playback::PlaybackSink;
    use crate::types::{AudioFragment, InboundFrame, Speaker};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct ChannelLog {
        sent: Vec<Vec<u8>>,
        closes: usize,
        sender: Option<EventSender>,
    }

    struct FakeChannel(Rc<RefCell<ChannelLog>>);

    impl DuplexChannel for FakeChannel {
        fn is_open(&self) -> bool {
            self.0.borrow().closes == 0
        }

        fn send_binary(&mut self, fragment: AudioFragment) -> Result<()> {
            self.0.borrow_mut().sent.push(fragment.into_inner());
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closes += 1;
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        log: Rc<RefCell<ChannelLog>>,
        fail: bool,
        hang_once: Cell<bool>,
    }

    #[async_trait(?Send)]
    impl Connector for FakeConnector {
        async fn connect(&self, events: EventSender) -> Result<Box<dyn DuplexChannel>> {
            if self.hang_once.replace(false) {
                std::future::pending::<()>().await;
            }
            if self.fail {
                anyhow::bail!("connection refused");
            }
            *self.log.borrow_mut() = ChannelLog {
                sender: Some(events),
                ..Default::default()
            };
            Ok(Box::new(FakeChannel(self.log.clone())))
        }
    }

    #[derive(Default)]
    struct CaptureLog {
        acquired: usize,
        pauses: usize,
        resumes: usize,
        releases: usize,
    }

    struct RecordingStream(Rc<RefCell<CaptureLog>>);

    impl CaptureStream for RecordingStream {
        fn pause(&mut self) -> Result<()> {
            self.0.borrow_mut().pauses += 1;
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            self.0.borrow_mut().resumes += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.0.borrow_mut().releases += 1;
        }
    }

    #[derive(Default)]
    struct FakeCapture {
        log: Rc<RefCell<CaptureLog>>,
        fail: bool,
        prepared: RefCell<Option<Box<dyn CaptureStream>>>,
    }

    #[async_trait(?Send)]
    impl CaptureSource for FakeCapture {
        async fn acquire(&self, _events: EventSender) -> Result<Box<dyn CaptureStream>> {
            if self.fail {
                anyhow::bail!("permission denied");
            }
            self.log.borrow_mut().acquired += 1;
            match self.prepared.borrow_mut().take() {
                Some(stream) => Ok(stream),
                None => Ok(Box::new(RecordingStream(self.log.clone()))),
            }
        }
    }

    #[derive(Default)]
    struct FakeSinks {
        log: Rc<RefCell<SinkLog>>,
        fail: bool,
    }

    impl SinkFactory for FakeSinks {
        fn create(&self, _events: EventSender) -> Result<Box<dyn PlaybackSink>> {
            if self.fail {
                anyhow::bail!("no output device");
            }
            *self.log.borrow_mut() = SinkLog::default();
            Ok(Box::new(RecordingSink(self.log.clone())))
        }
    }

    type Controller = SessionController<FakeConnector, FakeCapture, FakeSinks>;

    struct Harness {
        channel: Rc<RefCell<ChannelLog>>,
        capture: Rc<RefCell<CaptureLog>>,
        sink: Rc<RefCell<SinkLog>>,
    }

    impl Harness {
        fn post(&self, event: SessionEvent) {
            self.sender().send(event).unwrap();
        }

        fn sender(&self) -> EventSender {
            self.channel.borrow().sender.clone().unwrap()
        }

        fn assert_released(&self) {
            assert_eq!(self.channel.borrow().closes, 1);
            assert_eq!(self.capture.borrow().releases, 1);
            assert_eq!(self.sink.borrow().disposed, 1);
        }
    }

    fn controller(connector: FakeConnector, capture: FakeCapture, sinks: FakeSinks) -> (Controller, Harness) {
        let harness = Harness {
            channel: connector.log.clone(),
            capture: capture.log.clone(),
            sink: sinks.log.clone(),
        };
        (SessionController::new(connector, capture, sinks), harness)
    }

    fn fakes() -> (Controller, Harness) {
        controller(FakeConnector::default(), FakeCapture::default(), FakeSinks::default())
    }

    async fn step(controller: &mut Controller) {
        let event = controller.next_event().await.unwrap();
        controller.handle_event(event);
    }

    fn text(json: &str) -> SessionEvent {
        SessionEvent::frame(InboundFrame::Text(json.to_string()))
    }

    fn binary(bytes: &[u8]) -> SessionEvent {
        SessionEvent::frame(InboundFrame::Binary(bytes.to_vec()))
    }

    #[tokio::test]
    async fn burst_is_played_in_order_then_finish_releases_everything() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();
        assert_eq!(controller.state(), SessionState::Active(Activity::Listening));

        harness.post(binary(&[1]));
        harness.post(binary(&[2]));
        step(&mut controller).await;
        step(&mut controller).await;
        assert_eq!(harness.sink.borrow().played(), vec![vec![1]]);

        let ticket = harness.sink.borrow().last_ticket();
        harness.post(SessionEvent::write_finished(ticket));
        step(&mut controller).await;
        assert_eq!(harness.sink.borrow().played(), vec![vec![1], vec![2]]);

        harness.post(text(r#"{"type":"finish"}"#));
        step(&mut controller).await;

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.is_running());
        assert_eq!(controller.last_end(), Some(&EndReason::Finished));
        harness.assert_released();
        assert!(controller.next_event().await.is_none());
    }

    #[tokio::test]
    async fn device_failure_leaves_nothing_open() {
        let capture = FakeCapture {
            fail: true,
            ..Default::default()
        };
        let (mut controller, harness) =
            controller(FakeConnector::default(), capture, FakeSinks::default());

        let result = controller.start().await;
        assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.is_running());
        assert_eq!(harness.channel.borrow().closes, 1);
    }

    #[tokio::test]
    async fn channel_failure_acquires_nothing_else() {
        let connector = FakeConnector {
            fail: true,
            ..Default::default()
        };
        let (mut controller, harness) =
            controller(connector, FakeCapture::default(), FakeSinks::default());

        let result = controller.start().await;
        assert!(matches!(result, Err(SessionError::ChannelUnavailable(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(harness.capture.borrow().acquired, 0);
    }

    #[tokio::test]
    async fn sink_failure_releases_channel_and_device() {
        let sinks = FakeSinks {
            fail: true,
            ..Default::default()
        };
        let (mut controller, harness) =
            controller(FakeConnector::default(), FakeCapture::default(), sinks);

        let result = controller.start().await;
        assert!(matches!(result, Err(SessionError::SinkUnavailable(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(harness.channel.borrow().closes, 1);
        assert_eq!(harness.capture.borrow().releases, 1);
    }

    #[tokio::test]
    async fn double_toggle_resumes_exactly_once() {
        let mut stream = MockCaptureStream::new();
        stream.expect_pause().times(1).returning(|| Ok(()));
        stream.expect_resume().times(1).returning(|| Ok(()));
        stream.expect_release().times(1).return_const(());
        let capture = FakeCapture {
            prepared: RefCell::new(Some(Box::new(stream))),
            ..Default::default()
        };
        let (mut controller, _harness) =
            controller(FakeConnector::default(), capture, FakeSinks::default());

        controller.start().await.unwrap();
        assert!(!controller.toggle_listening());
        assert_eq!(controller.state(), SessionState::Active(Activity::Paused));
        assert!(controller.toggle_listening());
        assert_eq!(controller.state(), SessionState::Active(Activity::Listening));
        controller.end();
    }

    #[tokio::test]
    async fn toggle_outside_a_conversation_does_nothing() {
        let (mut controller, harness) = fakes();
        assert!(!controller.toggle_listening());
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(harness.capture.borrow().pauses, 0);
    }

    #[tokio::test]
    async fn captured_chunks_are_sent_only_while_listening() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();

        harness.post(SessionEvent::Capture(AudioFragment::from(vec![5, 5])));
        step(&mut controller).await;
        controller.toggle_listening();
        harness.post(SessionEvent::Capture(AudioFragment::from(vec![6, 6])));
        step(&mut controller).await;

        assert_eq!(harness.channel.borrow().sent, vec![vec![5, 5]]);
    }

    #[tokio::test]
    async fn transcripts_become_turns() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();

        harness.post(text(r#"{"type":"transcript_interim","content":"hel"}"#));
        harness.post(text(r#"{"type":"transcript_final","content":"hello"}"#));
        harness.post(text(r#"{"type":"transcript_final","content":"world"}"#));
        harness.post(text(r#"{"type":"assistant","content":"hi there"}"#));
        for _ in 0..4 {
            step(&mut controller).await;
        }

        let turns = controller.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker(), Speaker::User);
        assert_eq!(turns[0].text(), "hello world");
        assert_eq!(turns[1].speaker(), Speaker::Assistant);
        assert_eq!(turns[1].text(), "hi there");
    }

    #[tokio::test]
    async fn start_resets_the_previous_conversation() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();
        harness.post(text(r#"{"type":"assistant","content":"first"}"#));
        step(&mut controller).await;
        controller.end();
        assert_eq!(controller.conversation().turns().len(), 1);

        controller.start().await.unwrap();
        assert!(controller.conversation().is_empty());
        assert_eq!(controller.last_end(), None);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let (mut controller, _harness) = fakes();
        controller.start().await.unwrap();
        let result = controller.start().await;
        assert!(matches!(
            result,
            Err(SessionError::AlreadyRunning(SessionState::Active(Activity::Listening)))
        ));
        assert!(controller.is_running());
    }

    #[tokio::test]
    async fn channel_error_ends_the_conversation() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();

        harness.post(SessionEvent::Channel(ChannelEvent::Error("reset by peer".into())));
        step(&mut controller).await;

        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(
            controller.last_end(),
            Some(&EndReason::ChannelError("reset by peer".into()))
        );
        harness.assert_released();
    }

    #[tokio::test]
    async fn run_stops_on_unexpected_close() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();

        harness.post(binary(&[1]));
        harness.post(SessionEvent::Channel(ChannelEvent::Closed(Some("going away".into()))));
        let reason = controller.run().await.cloned();

        assert_eq!(reason, Some(EndReason::ChannelClosed(Some("going away".into()))));
        harness.assert_released();
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();
        controller.end();
        controller.end();

        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.last_end(), Some(&EndReason::UserRequested));
        harness.assert_released();
    }

    #[tokio::test]
    async fn end_recovers_from_a_cancelled_start() {
        let connector = FakeConnector {
            hang_once: Cell::new(true),
            ..Default::default()
        };
        let (mut controller, harness) =
            controller(connector, FakeCapture::default(), FakeSinks::default());

        let timed_out = tokio::time::timeout(Duration::from_millis(10), controller.start()).await;
        assert!(timed_out.is_err());
        assert_eq!(controller.state(), SessionState::Connecting);

        controller.end();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(harness.capture.borrow().acquired, 0);

        controller.start().await.unwrap();
        assert!(controller.is_listening());
    }

    #[tokio::test]
    async fn events_from_an_ended_conversation_are_never_delivered() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();
        let stale = harness.sender();
        controller.end();

        assert!(stale.send(binary(&[9])).is_err());
        controller.handle_event(binary(&[9]));
        assert!(harness.sink.borrow().writes.is_empty());

        controller.start().await.unwrap();
        assert!(stale.send(text(r#"{"type":"finish"}"#)).is_err());
        assert!(controller.is_running());
    }

    #[tokio::test]
    async fn skip_audio_flushes_playback() {
        let (mut controller, harness) = fakes();
        controller.start().await.unwrap();
        harness.post(binary(&[1]));
        harness.post(binary(&[2]));
        step(&mut controller).await;
        step(&mut controller).await;

        controller.skip_audio();
        let ticket = harness.sink.borrow().last_ticket();
        harness.post(SessionEvent::write_finished(ticket));
        step(&mut controller).await;

        let sink = harness.sink.borrow();
        assert_eq!(sink.played(), vec![vec![1]]);
        assert_eq!(sink.cancels, 1);
        assert_eq!(sink.seeks, 1);
    }
}
