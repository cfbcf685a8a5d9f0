//! Row-change events as delivered by the host replication engine.

use std::fmt;

use crate::protocol::OperationKind;

/// Prefix the host engine gives its journal-control columns.
///
/// Such columns describe the journal entry, not the row, and are never sent.
pub const CONTROL_COLUMN_PREFIX: char = '&';

/// One column of a row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Rendered value, `None` for SQL NULL.
    pub value: Option<String>,
}

impl Column {
    /// Column with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// NULL column.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Whether this is a journal-control column.
    #[inline]
    pub fn is_control(&self) -> bool {
        self.name.starts_with(CONTROL_COLUMN_PREFIX)
    }
}

/// Ordered column values of a row before or after a change.
pub type RowImage = Vec<Column>;

/// Qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    /// Schema or library.
    pub schema: String,
    /// Table or object name.
    pub name: String,
}

impl TableId {
    /// Create a table identifier.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// One captured row change.
///
/// Inserts carry only an after image, deletes only a before image, updates
/// both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Row operation.
    pub kind: OperationKind,
    /// Table the row belongs to.
    pub table: TableId,
    /// Source transaction id.
    pub tx_id: String,
    /// Source commit timestamp.
    pub tx_timestamp: String,
    /// User that made the change.
    pub user: String,
    /// Row before the change.
    pub before: Option<RowImage>,
    /// Row after the change.
    pub after: Option<RowImage>,
}

impl ChangeEvent {
    /// An insert of `after`.
    pub fn insert(table: TableId, tx_id: &str, tx_timestamp: &str, after: RowImage) -> Self {
        Self {
            kind: OperationKind::Insert,
            table,
            tx_id: tx_id.to_string(),
            tx_timestamp: tx_timestamp.to_string(),
            user: String::new(),
            before: None,
            after: Some(after),
        }
    }

    /// An update from `before` to `after`.
    pub fn update(
        table: TableId,
        tx_id: &str,
        tx_timestamp: &str,
        before: RowImage,
        after: RowImage,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            table,
            tx_id: tx_id.to_string(),
            tx_timestamp: tx_timestamp.to_string(),
            user: String::new(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// A delete of `before`.
    pub fn delete(table: TableId, tx_id: &str, tx_timestamp: &str, before: RowImage) -> Self {
        Self {
            kind: OperationKind::Delete,
            table,
            tx_id: tx_id.to_string(),
            tx_timestamp: tx_timestamp.to_string(),
            user: String::new(),
            before: Some(before),
            after: None,
        }
    }

    /// Set the source user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_column_detection() {
        assert!(Column::new("&ENTTYP", "PT").is_control());
        assert!(!Column::new("ID", "1").is_control());
        assert!(!Column::null("A&B").is_control());
    }

    #[test]
    fn test_table_display() {
        assert_eq!(TableId::new("LIB", "ORDERS").to_string(), "LIB.ORDERS");
    }

    #[test]
    fn test_constructors_set_images() {
        let t = TableId::new("S", "T");
        let ins = ChangeEvent::insert(t.clone(), "1", "ts", vec![Column::new("A", "1")]);
        assert!(ins.before.is_none() && ins.after.is_some());
        assert_eq!(ins.kind, OperationKind::Insert);

        let del = ChangeEvent::delete(t.clone(), "1", "ts", vec![Column::new("A", "1")]);
        assert!(del.before.is_some() && del.after.is_none());

        let upd = ChangeEvent::update(t, "1", "ts", vec![], vec![]).with_user("BOB");
        assert_eq!(upd.user, "BOB");
        assert_eq!(upd.kind, OperationKind::Update);
    }
}
