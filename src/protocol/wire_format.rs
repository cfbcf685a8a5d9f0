//! Line format primitives.
//!
//! Every record is one physical text line:
//! ```text
//! ┌────────┬──────┬─────────┬──────┬─────────┬─────┐
//! │ prefix │ META │ field 1 │ META │ field 2 │ ... │ \n
//! │ 1 char │      │         │      │         │     │
//! └────────┴──────┴─────────┴──────┴─────────┴─────┘
//! ```
//!
//! `META` is the metadata separator (default `0x00`). Column values inside the
//! before/after image blocks of a data record are joined by the data
//! separator (default `0x1D`).

use chrono::{DateTime, Local};

use crate::error::{CdcWireError, Result};

/// Default separator between column values (ASCII group separator).
pub const DEFAULT_DATA_SEPARATOR: char = '\u{1d}';

/// Default separator between protocol fields (NUL).
pub const DEFAULT_METADATA_SEPARATOR: char = '\u{0}';

/// Record terminator. Never configurable.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Record prefixes, producer to consumer.
pub mod prefix {
    /// Channel initialized.
    pub const INIT: char = 'i';
    /// One row change.
    pub const DATA: char = 'd';
    /// Transaction commit.
    pub const COMMIT: char = 'c';
    /// Handshake request.
    pub const HANDSHAKE: char = 'h';
    /// Finalize (subscription stopping).
    pub const FINALIZE: char = 'f';
}

/// Literal marker texts carried by the control records.
pub mod marker {
    /// Carried by `i` records.
    pub const INITIALIZE: &str = "***INITIALIZE***";
    /// Carried by `c` records.
    pub const COMMIT: &str = "***COMMIT***";
    /// Carried by `h` records.
    pub const HANDSHAKE: &str = "***HANDSHAKE***";
    /// Carried by `f` records.
    pub const FINALIZE: &str = "***FINALIZE***";
}

/// The two delimiter levels of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    /// Between column values.
    pub data: char,
    /// Between protocol fields.
    pub metadata: char,
}

impl Separators {
    /// Create a separator pair.
    pub fn new(data: char, metadata: char) -> Self {
        Self { data, metadata }
    }

    /// Check that the pair can frame records unambiguously.
    pub fn validate(&self) -> Result<()> {
        if self.data == self.metadata {
            return Err(CdcWireError::Config(format!(
                "Data and metadata separators must differ, both are {:?}",
                self.data
            )));
        }
        for sep in [self.data, self.metadata] {
            if sep == '\n' || sep == '\r' {
                return Err(CdcWireError::Config(
                    "Separators cannot be line-break characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            data: DEFAULT_DATA_SEPARATOR,
            metadata: DEFAULT_METADATA_SEPARATOR,
        }
    }
}

/// Join column values into one image block.
///
/// `None` values become zero-length strings.
pub fn join_columns<I, S>(values: I, data_separator: char) -> String
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut block = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i != 0 {
            block.push(data_separator);
        }
        if let Some(v) = value {
            block.push_str(v.as_ref());
        }
    }
    block
}

/// Split an image block back into column values.
///
/// A block always holds at least one column; an empty block is one empty
/// column.
pub fn split_columns(block: &str, data_separator: char) -> Vec<&str> {
    block.split(data_separator).collect()
}

/// Separator-only block for `columns` empty values.
pub fn empty_block(columns: usize, data_separator: char) -> String {
    std::iter::repeat(data_separator)
        .take(columns.saturating_sub(1))
        .collect()
}

/// Format a timestamp the way the consumer expects it.
///
/// `yyyy-MM-dd HH:mm:ss.SSS000`: millisecond precision padded to six digits.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f000").to_string()
}

/// Current local time in wire format.
pub fn now_timestamp() -> String {
    format_timestamp(Local::now())
}
