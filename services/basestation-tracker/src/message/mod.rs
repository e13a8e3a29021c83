//! BaseStation feed: message model, line parsing and the TCP reader

pub mod parser;
pub mod reader;
pub mod types;

pub use parser::{MessageParser, MsgMessageParser};
pub use reader::{MessageReader, ReaderEvent};
pub use types::{Message, MessageType, TransmissionType};
