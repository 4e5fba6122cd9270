pub const TRANSCRIPT_INTERIM: &str = "transcript_interim";
pub const TRANSCRIPT_FINAL: &str = "transcript_final";
pub const SPEECH_FINAL: &str = "speech_final";
pub const ASSISTANT: &str = "assistant";
pub const FINISH: &str = "finish";

/// Shape of every text frame sent by the peer: `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, serde::Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
}

/// A structured message received on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    InterimTranscript(String),
    FinalTranscript(String),
    /// Carries the whole utterance when present. Currently unused by the client.
    SpeechFinal(Option<String>),
    Assistant(String),
    Finish,
    /// Any other `type`. Accepted so the peer can add message kinds freely.
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid control frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` message is missing its content")]
    MissingContent(&'static str),
}

impl ControlMessage {
    /// Parses a text frame. Unknown `type` values parse successfully as [`ControlMessage::Unknown`].
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let content = envelope.content;
        let required = |tag: &'static str| content.clone().ok_or(ParseError::MissingContent(tag));

        let message = match envelope.kind.as_str() {
            TRANSCRIPT_INTERIM => Self::InterimTranscript(required(TRANSCRIPT_INTERIM)?),
            TRANSCRIPT_FINAL => Self::FinalTranscript(required(TRANSCRIPT_FINAL)?),
            SPEECH_FINAL => Self::SpeechFinal(content.clone()),
            ASSISTANT => Self::Assistant(required(ASSISTANT)?),
            FINISH => Self::Finish,
            other => Self::Unknown(other.to_string()),
        };
        Ok(message)
    }

    /// The wire tag of this message.
    pub fn tag(&self) -> &str {
        match self {
            Self::InterimTranscript(_) => TRANSCRIPT_INTERIM,
            Self::FinalTranscript(_) => TRANSCRIPT_FINAL,
            Self::SpeechFinal(_) => SPEECH_FINAL,
            Self::Assistant(_) => ASSISTANT,
            Self::Finish => FINISH,
            Self::Unknown(tag) => tag,
        }
    }
}
