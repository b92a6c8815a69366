//! Domain models for the sync engine

mod cursor;
mod message;
mod record;

pub use cursor::Cursor;
pub use message::{
    CandidateMessage, CandidateMessageBuilder, EmailAddress, Header, MessageId, MessageRef,
    MimePart,
};
pub use record::{NaturalKey, NormalizedRecord, SHEET_HEADERS};
