pub mod common;
pub mod enums;
pub mod header;
pub mod message;
pub mod question;
pub mod resource;

pub use enums::{RCode, RecordClass, RecordType};
pub use header::DnsHeader;
pub use message::DnsMessage;
pub use question::DnsQuestion;
pub use resource::{DnsResourceRecord, RData};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("invalid DNS label")]
    InvalidLabel,
    #[error("invalid resource record data")]
    InvalidRData,
    #[error("unexpected end of packet")]
    UnexpectedEof,
    #[error("packet exceeds maximum size")]
    TooLarge,
}

impl From<std::io::Error> for ParseError {
    fn from(_: std::io::Error) -> Self {
        ParseError::UnexpectedEof
    }
}
