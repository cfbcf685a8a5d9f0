//! Consumer-to-producer acknowledgments.
//!
//! Only acknowledgment-enforcing TCP consumers send these. A line is
//! classified by its first character alone; the rest is informational.

/// Ready: the consumer's ports are up.
pub const ACK_READY: char = 'i';

/// Handshake acknowledged: everything up to the handshake is durable.
pub const ACK_HANDSHAKE: char = 'h';

/// Handshake declined: the consumer is not ready to confirm yet.
pub const ACK_DECLINE: char = 't';

/// Classified acknowledgment line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Consumer is ready to receive changes.
    Ready,
    /// Handshake confirmed.
    Handshake,
    /// Handshake explicitly declined.
    Declined,
    /// Present but not understood.
    Unrecognized(String),
}

impl Ack {
    /// Classify a raw acknowledgment line.
    ///
    /// # Example
    ///
    /// ```
    /// use cdcwire::protocol::Ack;
    ///
    /// assert_eq!(Ack::classify("h"), Ack::Handshake);
    /// assert_eq!(Ack::classify("t timeout"), Ack::Declined);
    /// ```
    pub fn classify(line: &str) -> Self {
        match line.chars().next() {
            Some(ACK_READY) => Ack::Ready,
            Some(ACK_HANDSHAKE) => Ack::Handshake,
            Some(ACK_DECLINE) => Ack::Declined,
            _ => Ack::Unrecognized(line.to_string()),
        }
    }
}
