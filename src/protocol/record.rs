//! The five producer-side record kinds and their line encoding.
//!
//! | Prefix | Fields |
//! |---|---|
//! | `i` | marker, timestamp |
//! | `d` | table, tx timestamp, tx id, op-code, user, before block, after block |
//! | `c` | marker, tx timestamp, tx id |
//! | `h` | marker, timestamp |
//! | `f` | marker, timestamp |

use std::fmt;

use super::wire_format::{marker, prefix, split_columns, Separators};
use crate::error::{CdcWireError, Result};

/// Row operation carried by a data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// New row, after image only.
    Insert,
    /// Changed row, both images.
    Update,
    /// Removed row, before image only.
    Delete,
}

impl OperationKind {
    /// Wire op-code.
    pub fn code(self) -> char {
        match self {
            OperationKind::Insert => 'I',
            OperationKind::Update => 'U',
            OperationKind::Delete => 'D',
        }
    }

    /// Parse a wire op-code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'I' => Some(OperationKind::Insert),
            'U' => Some(OperationKind::Update),
            'D' => Some(OperationKind::Delete),
            _ => None,
        }
    }

    /// Map a journal entry type to an operation.
    ///
    /// `PT`, `PX` (put) and `RR` (refresh) are inserts, `UP` is an update and
    /// `DL` a delete. Other journal codes carry no row change.
    pub fn from_entry_type(entry_type: &str) -> Option<Self> {
        match entry_type {
            "PT" | "PX" | "RR" => Some(OperationKind::Insert),
            "UP" => Some(OperationKind::Update),
            "DL" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One row change, already reduced to wire fields.
///
/// The image blocks are data-separator-joined column values, produced by the
/// event encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Qualified table name.
    pub table: String,
    /// Source commit timestamp of the transaction.
    pub tx_timestamp: String,
    /// Source transaction id.
    pub tx_id: String,
    /// Row operation.
    pub operation: OperationKind,
    /// User that made the change at the source.
    pub user: String,
    /// Before-image block.
    pub before: String,
    /// After-image block.
    pub after: String,
}

impl DataRecord {
    /// Before-image column values.
    pub fn before_columns(&self, data_separator: char) -> Vec<&str> {
        split_columns(&self.before, data_separator)
    }

    /// After-image column values.
    pub fn after_columns(&self, data_separator: char) -> Vec<&str> {
        split_columns(&self.after, data_separator)
    }
}

/// A producer-to-consumer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Channel initialized.
    Init {
        /// Local time the session started.
        timestamp: String,
    },
    /// One row change.
    Data(DataRecord),
    /// The transaction closed by the last boundary.
    Commit {
        /// Source commit timestamp.
        tx_timestamp: String,
        /// Source transaction id.
        tx_id: String,
    },
    /// Request for an acknowledgment of everything sent so far.
    Handshake {
        /// Local time of the request.
        timestamp: String,
    },
    /// The producer is stopping.
    Finalize {
        /// Local time of shutdown.
        timestamp: String,
    },
}

impl Record {
    /// The record's prefix character.
    pub fn prefix(&self) -> char {
        match self {
            Record::Init { .. } => prefix::INIT,
            Record::Data(_) => prefix::DATA,
            Record::Commit { .. } => prefix::COMMIT,
            Record::Handshake { .. } => prefix::HANDSHAKE,
            Record::Finalize { .. } => prefix::FINALIZE,
        }
    }

    /// Encode to a single line, without the terminator.
    ///
    /// Fields are written as given; callers must not pass separator or
    /// line-break characters inside them.
    pub fn encode(&self, separators: &Separators) -> String {
        let fields: Vec<&str> = match self {
            Record::Init { timestamp } => vec![marker::INITIALIZE, timestamp],
            Record::Data(d) => {
                return encode_data(d, separators);
            }
            Record::Commit {
                tx_timestamp,
                tx_id,
            } => vec![marker::COMMIT, tx_timestamp, tx_id],
            Record::Handshake { timestamp } => vec![marker::HANDSHAKE, timestamp],
            Record::Finalize { timestamp } => vec![marker::FINALIZE, timestamp],
        };

        let mut line = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum::<usize>() + 1);
        line.push(self.prefix());
        for field in fields {
            line.push(separators.metadata);
            line.push_str(field);
        }
        line
    }

    /// Decode a line (terminator optional).
    pub fn decode(line: &str, separators: &Separators) -> Result<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut chars = line.chars();
        let kind = chars
            .next()
            .ok_or_else(|| CdcWireError::Protocol("Empty record".to_string()))?;
        let rest = chars.as_str();
        let body = rest.strip_prefix(separators.metadata).ok_or_else(|| {
            CdcWireError::Protocol(format!(
                "Record '{}' is not followed by a metadata separator",
                kind
            ))
        })?;
        let fields: Vec<&str> = body.split(separators.metadata).collect();

        match kind {
            prefix::INIT => {
                let [ts] = expect_marker::<1>(kind, &fields, marker::INITIALIZE)?;
                Ok(Record::Init {
                    timestamp: ts.to_string(),
                })
            }
            prefix::DATA => decode_data(&fields),
            prefix::COMMIT => {
                let [ts, id] = expect_marker::<2>(kind, &fields, marker::COMMIT)?;
                Ok(Record::Commit {
                    tx_timestamp: ts.to_string(),
                    tx_id: id.to_string(),
                })
            }
            prefix::HANDSHAKE => {
                let [ts] = expect_marker::<1>(kind, &fields, marker::HANDSHAKE)?;
                Ok(Record::Handshake {
                    timestamp: ts.to_string(),
                })
            }
            prefix::FINALIZE => {
                let [ts] = expect_marker::<1>(kind, &fields, marker::FINALIZE)?;
                Ok(Record::Finalize {
                    timestamp: ts.to_string(),
                })
            }
            other => Err(CdcWireError::Protocol(format!(
                "Unknown record prefix '{}'",
                other.escape_debug()
            ))),
        }
    }
}

fn encode_data(d: &DataRecord, separators: &Separators) -> String {
    let mut op = [0u8; 4];
    let fields = [
        d.table.as_str(),
        d.tx_timestamp.as_str(),
        d.tx_id.as_str(),
        &*d.operation.code().encode_utf8(&mut op),
        d.user.as_str(),
        d.before.as_str(),
        d.after.as_str(),
    ];
    let mut line = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum::<usize>() + 1);
    line.push(prefix::DATA);
    for field in fields {
        line.push(separators.metadata);
        line.push_str(field);
    }
    line
}

fn decode_data(fields: &[&str]) -> Result<Record> {
    let [table, ts, id, op, user, before, after]: [&str; 7] =
        fields.try_into().map_err(|_| {
            CdcWireError::Protocol(format!(
                "Data record has {} fields, expected 7",
                fields.len()
            ))
        })?;

    let mut op_chars = op.chars();
    let operation = match (op_chars.next(), op_chars.next()) {
        (Some(c), None) => OperationKind::from_code(c),
        _ => None,
    }
    .ok_or_else(|| CdcWireError::Protocol(format!("Unknown op-code '{}'", op)))?;

    Ok(Record::Data(DataRecord {
        table: table.to_string(),
        tx_timestamp: ts.to_string(),
        tx_id: id.to_string(),
        operation,
        user: user.to_string(),
        before: before.to_string(),
        after: after.to_string(),
    }))
}

/// Check the marker field and return the remaining `N` fields.
fn expect_marker<'a, const N: usize>(
    kind: char,
    fields: &[&'a str],
    expected: &str,
) -> Result<[&'a str; N]> {
    let (first, rest) = fields
        .split_first()
        .ok_or_else(|| CdcWireError::Protocol(format!("Record '{}' has no fields", kind)))?;
    if *first != expected {
        return Err(CdcWireError::Protocol(format!(
            "Record '{}' carries marker '{}', expected '{}'",
            kind, first, expected
        )));
    }
    rest.try_into().map_err(|_| {
        CdcWireError::Protocol(format!(
            "Record '{}' has {} fields after its marker, expected {}",
            kind,
            rest.len(),
            N
        ))
    })
}
