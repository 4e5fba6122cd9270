//! Transcript aggregation.
//!
//! The conversation log is a plain value updated by [`reduce`]; the session controller
//! keeps the current value and replaces it with whatever `reduce` returns.

use crate::types::Turn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Back to the empty conversation.
    Reset,
    /// Provisional recognition result; replaces the previous one.
    Interim(String),
    /// Committed fragment of the user's current utterance.
    Final(String),
    AssistantTurn(String),
    /// The user's utterance is over: commit the finalized fragments as one turn.
    TurnComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
    finals: Vec<String>,
    interim: String,
}

impl Conversation {
    /// Committed turns, in display order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Finalized fragments not yet committed as a turn.
    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// The user's utterance as it will be committed.
    pub fn pending_utterance(&self) -> String {
        self.finals.join(" ")
    }

    /// What the user is saying right now: finalized fragments followed by the interim one.
    pub fn current_transcript(&self) -> String {
        self.finals
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.interim.as_str()))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.finals.is_empty() && self.interim.is_empty()
    }
}

pub fn reduce(state: Conversation, event: TranscriptEvent) -> Conversation {
    let mut next = state;
    match event {
        TranscriptEvent::Reset => return Conversation::default(),
        TranscriptEvent::Interim(text) => next.interim = text,
        TranscriptEvent::Final(text) => {
            next.finals.push(text);
            next.interim.clear();
        }
        TranscriptEvent::AssistantTurn(text) => next.turns.push(Turn::assistant(text)),
        TranscriptEvent::TurnComplete => {
            if !next.finals.is_empty() {
                let utterance = next.pending_utterance();
                next.finals.clear();
                next.interim.clear();
                next.turns.push(Turn::user(utterance));
            }
        }
    }
    next
}
