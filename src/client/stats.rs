/// Traffic counters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    frames_sent: u64,
    bytes_sent: u64,
    text_frames_received: u64,
    binary_frames_received: u64,
    bytes_received: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_text_received(&mut self, bytes: usize) {
        self.text_frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn record_binary_received(&mut self, bytes: usize) {
        self.binary_frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn text_frames_received(&self) -> u64 {
        self.text_frames_received
    }

    pub fn binary_frames_received(&self) -> u64 {
        self.binary_frames_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}
