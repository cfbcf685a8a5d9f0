//! Protocol module - line format, record kinds and acknowledgments.
//!
//! This module is pure: no I/O and no state.
//! - Separators, prefixes, markers and timestamp format
//! - The five producer records with encode/decode
//! - Acknowledgment classification

mod ack;
mod record;
mod wire_format;

pub use ack::{Ack, ACK_DECLINE, ACK_HANDSHAKE, ACK_READY};
pub use record::{DataRecord, OperationKind, Record};
pub use wire_format::{
    empty_block, format_timestamp, join_columns, marker, now_timestamp, prefix, split_columns,
    Separators, DEFAULT_DATA_SEPARATOR, DEFAULT_METADATA_SEPARATOR, RECORD_TERMINATOR,
};
