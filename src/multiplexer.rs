//! Inbound frame classification and control message dispatch.
//!
//! Every frame read from the duplex channel lands on exactly one [`Route`]; none of them
//! can fail the session. Audio goes to the playback buffer, recognized control
//! messages update the conversation or end it, anything else is logged and dropped.

use crate::aggregator::{reduce, Conversation, TranscriptEvent};
use crate::playback::PlaybackBuffer;
use crate::types::{AudioFragment, ControlMessage, InboundFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Audio(AudioFragment),
    Control(ControlMessage),
    /// Well-formed message with a `type` this client does not handle.
    Unrecognized(String),
    /// Text frame that could not be parsed.
    Malformed(String),
}

/// What the session controller must do after a frame was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    EndConversation,
}

pub fn classify(frame: InboundFrame) -> Route {
    match frame {
        InboundFrame::Binary(bytes) => Route::Audio(AudioFragment::from(bytes)),
        InboundFrame::Text(text) => match ControlMessage::parse(&text) {
            Ok(ControlMessage::Unknown(tag)) => Route::Unrecognized(tag),
            Ok(message) => Route::Control(message),
            Err(e) => Route::Malformed(e.to_string()),
        },
    }
}

pub fn dispatch(
    route: Route,
    playback: &mut PlaybackBuffer,
    conversation: &mut Conversation,
) -> Directive {
    match route {
        Route::Audio(fragment) => {
            tracing::trace!("received {} bytes of audio", fragment.len());
            playback.enqueue(fragment);
        }
        Route::Control(message) => {
            tracing::debug!("received control message: {}", message.tag());
            return handle_control(message, conversation);
        }
        Route::Unrecognized(tag) => {
            tracing::warn!("unknown message type: {}", tag);
        }
        Route::Malformed(reason) => {
            tracing::error!("discarding malformed message: {}", reason);
        }
    }
    Directive::Continue
}

fn handle_control(message: ControlMessage, conversation: &mut Conversation) -> Directive {
    let events = match message {
        ControlMessage::InterimTranscript(text) => vec![TranscriptEvent::Interim(text)],
        ControlMessage::FinalTranscript(text) => vec![TranscriptEvent::Final(text)],
        ControlMessage::Assistant(text) => vec![
            TranscriptEvent::TurnComplete,
            TranscriptEvent::AssistantTurn(text),
        ],
        ControlMessage::Finish => return Directive::EndConversation,
        // `Unknown` is routed as `Route::Unrecognized` by `classify`.
        ControlMessage::SpeechFinal(_) | ControlMessage::Unknown(_) => return Directive::Continue,
    };
    for event in events {
        *conversation = reduce(std::mem::take(conversation), event);
    }
    Directive::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::tests::{RecordingSink, SinkLog};
    use crate::types::Turn;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        playback: PlaybackBuffer,
        sink: Rc<RefCell<SinkLog>>,
        conversation: Conversation,
    }

    impl Fixture {
        fn new() -> Self {
            let sink = Rc::new(RefCell::new(SinkLog::default()));
            Self {
                playback: PlaybackBuffer::new(Box::new(RecordingSink(sink.clone()))),
                sink,
                conversation: Conversation::default(),
            }
        }

        fn text(&mut self, text: &str) -> Directive {
            let route = classify(InboundFrame::Text(text.to_string()));
            dispatch(route, &mut self.playback, &mut self.conversation)
        }

        fn binary(&mut self, bytes: &[u8]) -> Directive {
            let route = classify(InboundFrame::Binary(bytes.to_vec()));
            dispatch(route, &mut self.playback, &mut self.conversation)
        }
    }

    #[test]
    fn classification_is_total() {
        assert_eq!(
            classify(InboundFrame::Binary(vec![7])),
            Route::Audio(AudioFragment::from(vec![7]))
        );
        assert_eq!(
            classify(InboundFrame::Text(r#"{"type":"finish"}"#.to_string())),
            Route::Control(ControlMessage::Finish)
        );
        assert_eq!(
            classify(InboundFrame::Text(r#"{"type":"ping"}"#.to_string())),
            Route::Unrecognized("ping".to_string())
        );
        assert!(matches!(
            classify(InboundFrame::Text("{oops".to_string())),
            Route::Malformed(_)
        ));
    }

    #[test]
    fn assistant_frame_adds_exactly_one_turn() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.text(r#"{"type":"assistant","content":"Hi"}"#),
            Directive::Continue
        );
        assert_eq!(fx.conversation.turns(), &[Turn::assistant("Hi")]);
    }

    #[test]
    fn unknown_and_malformed_frames_change_nothing() {
        let mut fx = Fixture::new();
        fx.text(r#"{"type":"transcript_interim","content":"so"}"#);
        let before = fx.conversation.clone();

        assert_eq!(fx.text(r#"{"type":"bogus"}"#), Directive::Continue);
        assert_eq!(fx.text("definitely not json"), Directive::Continue);
        assert_eq!(fx.text(r#"{"type":"assistant"}"#), Directive::Continue);
        assert_eq!(fx.conversation, before);
        assert!(fx.sink.borrow().writes.is_empty());
    }

    #[test]
    fn transcripts_drive_the_aggregator() {
        let mut fx = Fixture::new();
        fx.text(r#"{"type":"transcript_interim","content":"hel"}"#);
        assert_eq!(fx.conversation.interim(), "hel");
        fx.text(r#"{"type":"transcript_final","content":"hello"}"#);
        fx.text(r#"{"type":"transcript_final","content":"world"}"#);
        fx.text(r#"{"type":"speech_final","content":"hello world"}"#);
        assert!(fx.conversation.turns().is_empty());
        assert_eq!(fx.conversation.current_transcript(), "hello world");

        fx.text(r#"{"type":"assistant","content":"Hi there"}"#);
        assert_eq!(
            fx.conversation.turns(),
            &[Turn::user("hello world"), Turn::assistant("Hi there")]
        );
        assert!(fx.conversation.finals().is_empty());
    }

    #[test]
    fn binary_frames_are_enqueued_verbatim() {
        let mut fx = Fixture::new();
        fx.binary(&[1, 2]);
        fx.binary(&[3]);
        assert_eq!(fx.sink.borrow().played(), vec![vec![1, 2]]);
        assert_eq!(fx.playback.pending_len(), 1);
    }

    #[test]
    fn assistant_reply_keeps_queued_audio() {
        let mut fx = Fixture::new();
        fx.binary(&[1]);
        fx.binary(&[2]);
        fx.binary(&[3]);
        fx.text(r#"{"type":"assistant","content":"next"}"#);
        assert_eq!(fx.playback.pending_len(), 2);

        for _ in 0..3 {
            let ticket = fx.sink.borrow().last_ticket();
            fx.playback.on_write_finished(ticket, Ok(()));
        }
        let sink = fx.sink.borrow();
        assert_eq!(sink.played(), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(sink.cancels, 0);
        assert_eq!(sink.seeks, 0);
    }

    #[test]
    fn control_unknown_reaching_dispatch_is_ignored() {
        let mut fx = Fixture::new();
        fx.binary(&[1]);
        let route = Route::Control(ControlMessage::Unknown("ping".to_string()));
        assert_eq!(
            dispatch(route, &mut fx.playback, &mut fx.conversation),
            Directive::Continue
        );
        assert!(fx.conversation.is_empty());
        assert_eq!(fx.sink.borrow().played(), vec![vec![1]]);
    }

    #[test]
    fn finish_ends_the_conversation() {
        let mut fx = Fixture::new();
        assert_eq!(fx.text(r#"{"type":"finish"}"#), Directive::EndConversation);
    }
}
