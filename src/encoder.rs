//! Event encoder - turns one [`ChangeEvent`] into one data record.
//!
//! Rules:
//! - journal-control columns (`&` prefix) are dropped
//! - a missing before or after image is replaced by the table's empty-image
//!   template, so every data record of a table has the same shape
//! - values of configured columns get line breaks and separators replaced,
//!   keeping each record on one physical line
//!
//! The template is derived once, from the first event seen, and is modelled as
//! an explicit [`ImageTemplate`] state so the transition can be inspected.

use std::borrow::Cow;
use std::collections::HashSet;

use crate::config::Settings;
use crate::error::{CdcWireError, Result};
use crate::event::{ChangeEvent, Column};
use crate::protocol::{empty_block, join_columns, DataRecord, Separators};

/// Empty-image template of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTemplate {
    /// No event seen yet.
    Uninitialized,
    /// Derived from the first event.
    Initialized {
        /// Replicated (non-control) column count.
        columns: usize,
        /// `columns - 1` data separators.
        empty: String,
    },
}

/// Builds data records for a single table.
#[derive(Debug, Clone)]
pub struct EventEncoder {
    separators: Separators,
    sanitize: HashSet<String>,
    replacement: char,
    template: ImageTemplate,
}

impl EventEncoder {
    /// Create an encoder.
    pub fn new(separators: Separators, sanitize: HashSet<String>, replacement: char) -> Self {
        Self {
            separators,
            sanitize,
            replacement,
            template: ImageTemplate::Uninitialized,
        }
    }

    /// Create an encoder from subscription settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.separators(),
            settings.columns_to_sanitize.clone(),
            settings.sanitize_replacement_char,
        )
    }

    /// Current template state.
    pub fn template(&self) -> &ImageTemplate {
        &self.template
    }

    /// Whether the template has been derived.
    pub fn is_initialized(&self) -> bool {
        matches!(self.template, ImageTemplate::Initialized { .. })
    }

    /// Derive the template from `image` if not done yet.
    ///
    /// Returns the template block.
    pub fn initialize(&mut self, image: &[Column]) -> &str {
        if let ImageTemplate::Uninitialized = self.template {
            let columns = image.iter().filter(|c| !c.is_control()).count();
            let empty = empty_block(columns, self.separators.data);
            tracing::debug!(columns, "Derived empty image template");
            self.template = ImageTemplate::Initialized { columns, empty };
        }
        match &self.template {
            ImageTemplate::Initialized { empty, .. } => empty,
            ImageTemplate::Uninitialized => "",
        }
    }

    /// Encode one event.
    pub fn encode(&mut self, event: &ChangeEvent) -> Result<DataRecord> {
        let first = event
            .after
            .as_deref()
            .or(event.before.as_deref())
            .ok_or_else(|| CdcWireError::InvalidEvent {
                table: event.table.to_string(),
                reason: "event carries neither a before nor an after image".to_string(),
            })?;
        let empty = self.initialize(first).to_string();

        let before = match &event.before {
            Some(image) => self.image_block(image),
            None => {
                tracing::debug!(table = %event.table, "Before image is empty");
                empty.clone()
            }
        };
        let after = match &event.after {
            Some(image) => self.image_block(image),
            None => {
                tracing::debug!(table = %event.table, "After image is empty");
                empty
            }
        };

        Ok(DataRecord {
            table: event.table.to_string(),
            tx_timestamp: event.tx_timestamp.clone(),
            tx_id: event.tx_id.clone(),
            operation: event.kind,
            user: event.user.clone(),
            before,
            after,
        })
    }

    /// Join the replicated columns of an image.
    fn image_block(&self, image: &[Column]) -> String {
        join_columns(
            image.iter().filter(|c| !c.is_control()).map(|c| {
                c.value.as_deref().map(|v| {
                    if self.sanitize.contains(&c.name) {
                        sanitize_value(v, &self.separators, self.replacement)
                    } else {
                        Cow::Borrowed(v)
                    }
                })
            }),
            self.separators.data,
        )
    }
}

/// Replace line breaks and separators in `value` with `replacement`.
pub fn sanitize_value<'a>(value: &'a str, separators: &Separators, replacement: char) -> Cow<'a, str> {
    let is_unsafe =
        |c: char| c == '\n' || c == '\r' || c == separators.data || c == separators.metadata;
    if value.contains(is_unsafe) {
        Cow::Owned(
            value
                .chars()
                .map(|c| if is_unsafe(c) { replacement } else { c })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TableId;

    fn encoder() -> EventEncoder {
        EventEncoder::new(Separators::new('|', '#'), HashSet::new(), ' ')
    }

    fn row(values: &[Option<&str>]) -> Vec<Column> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Column {
                name: format!("C{}", i),
                value: v.map(str::to_string),
            })
            .collect()
    }

    fn table() -> TableId {
        TableId::new("LIB", "T")
    }

    #[test]
    fn test_starts_uninitialized() {
        let enc = encoder();
        assert_eq!(enc.template(), &ImageTemplate::Uninitialized);
        assert!(!enc.is_initialized());
    }

    #[test]
    fn test_insert_pads_before_image() {
        let mut enc = encoder();
        let ev = ChangeEvent::insert(table(), "7", "ts", row(&[Some("1"), Some("a"), None]));
        let rec = enc.encode(&ev).unwrap();
        assert_eq!(rec.before, "||");
        assert_eq!(rec.after, "1|a|");
        assert_eq!(rec.table, "LIB.T");
        assert_eq!(
            enc.template(),
            &ImageTemplate::Initialized {
                columns: 3,
                empty: "||".to_string()
            }
        );
    }

    #[test]
    fn test_first_event_delete_derives_template_from_before_image() {
        let mut enc = encoder();
        let ev = ChangeEvent::delete(table(), "7", "ts", row(&[Some("1"), Some("a"), Some("b"), None]));
        let rec = enc.encode(&ev).unwrap();
        assert_eq!(rec.after, "|||");
        assert_eq!(rec.after.matches('|').count(), 4 - 1);
        assert_eq!(rec.before, "1|a|b|");
    }

    #[test]
    fn test_template_is_not_rederived() {
        let mut enc = encoder();
        enc.encode(&ChangeEvent::insert(table(), "1", "ts", row(&[Some("1"), Some("2")])))
            .unwrap();
        let rec = enc
            .encode(&ChangeEvent::delete(
                table(),
                "2",
                "ts",
                row(&[Some("1"), Some("2"), Some("3")]),
            ))
            .unwrap();
        assert_eq!(rec.after, "|");
    }

    #[test]
    fn test_control_columns_excluded() {
        let mut enc = encoder();
        let mut after = row(&[Some("1"), Some("x")]);
        after.push(Column::new("&ENTTYP", "PT"));
        after.push(Column::new("&TIMSTAMP", "2024"));
        let rec = enc
            .encode(&ChangeEvent::insert(table(), "1", "ts", after))
            .unwrap();
        assert_eq!(rec.after, "1|x");
        assert_eq!(rec.before, "|");
    }

    #[test]
    fn test_update_keeps_both_images() {
        let mut enc = encoder();
        let rec = enc
            .encode(
                &ChangeEvent::update(
                    table(),
                    "9",
                    "ts",
                    row(&[Some("1"), Some("old")]),
                    row(&[Some("1"), Some("new")]),
                )
                .with_user("ALICE"),
            )
            .unwrap();
        assert_eq!(rec.before, "1|old");
        assert_eq!(rec.after, "1|new");
        assert_eq!(rec.user, "ALICE");
        assert_eq!(rec.tx_id, "9");
    }

    #[test]
    fn test_sanitizes_only_configured_columns() {
        let sanitize: HashSet<String> = ["NOTES".to_string()].into_iter().collect();
        let mut enc = EventEncoder::new(Separators::new('|', '#'), sanitize, '_');
        let after = vec![
            Column::new("NOTES", "line1\nline2|x#y\r"),
            Column::new("OTHER", "plain"),
        ];
        let rec = enc
            .encode(&ChangeEvent::insert(table(), "1", "ts", after))
            .unwrap();
        assert_eq!(rec.after, "line1_line2_x_y_|plain");
    }

    #[test]
    fn test_sanitize_value_borrows_when_clean() {
        let seps = Separators::default();
        assert!(matches!(sanitize_value("clean", &seps, ' '), Cow::Borrowed(_)));
        assert_eq!(sanitize_value("a\u{1d}b\u{0}c", &seps, ' '), "a b c");
    }

    #[test]
    fn test_event_without_images_rejected() {
        let mut enc = encoder();
        let mut ev = ChangeEvent::insert(table(), "1", "ts", vec![]);
        ev.after = None;
        let err = enc.encode(&ev).unwrap_err();
        assert!(matches!(err, CdcWireError::InvalidEvent { .. }));
        assert!(!enc.is_initialized());
    }
}
