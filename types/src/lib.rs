pub mod control;
pub mod conversation;
pub mod frame;

pub use control::{ControlMessage, ParseError};
pub use conversation::{Speaker, Turn};
pub use frame::{AudioFragment, InboundFrame};
