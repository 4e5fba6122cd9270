/// One chunk of encoded audio, either captured (outbound) or received (to be played).
///
/// The payload is opaque: nothing in the session looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFragment(Vec<u8>);

impl AudioFragment {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for AudioFragment {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for AudioFragment {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A frame read from the duplex channel, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Binary(Vec<u8>),
    Text(String),
}
