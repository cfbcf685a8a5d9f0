//! Batching record writer.
//!
//! Records are appended, newline-terminated, to an in-memory buffer and reach
//! the underlying writer in large `write_all` calls: when the buffer passes
//! its high-water mark, and on every [`RecordWriter::flush`].
//!
//! ```text
//! write_record ─► BytesMut ──(high water / flush)──► AsyncWrite
//! ```
//!
//! There is no retry. The first I/O error is returned and the writer is
//! poisoned: a half-written line stream cannot be repaired in place, so every
//! later call fails with `BrokenPipe`.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::RECORD_TERMINATOR;

/// Default buffer size before an implicit drain.
pub const DEFAULT_HIGH_WATER: usize = 64 * 1024;

/// Newline-terminated record writer over any async writer.
#[derive(Debug)]
pub struct RecordWriter<W> {
    inner: W,
    buf: BytesMut,
    high_water: usize,
    records: u64,
    bytes: u64,
    poisoned: bool,
}

impl<W> RecordWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer with the default high-water mark.
    pub fn new(inner: W) -> Self {
        Self::with_high_water(inner, DEFAULT_HIGH_WATER)
    }

    /// Create a writer that drains once `high_water` bytes are buffered.
    pub fn with_high_water(inner: W, high_water: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(high_water.min(DEFAULT_HIGH_WATER)),
            high_water,
            records: 0,
            bytes: 0,
            poisoned: false,
        }
    }

    /// Append one record; the terminator is added here.
    pub async fn write_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        self.check_poisoned()?;
        self.buf.reserve(record.len() + 1);
        self.buf.put_slice(record);
        self.buf.put_u8(RECORD_TERMINATOR);
        self.records += 1;

        if self.buf.len() >= self.high_water {
            self.drain().await?;
        }
        Ok(())
    }

    /// Push everything buffered to the underlying writer and flush it.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.check_poisoned()?;
        self.drain().await?;
        if let Err(e) = self.inner.flush().await {
            self.poisoned = true;
            return Err(e);
        }
        Ok(())
    }

    /// Flush, then shut down the write side.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.flush().await?;
        self.inner.shutdown().await
    }

    /// Records accepted so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Bytes handed to the underlying writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether an earlier I/O error made the stream unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[cfg(test)]
    fn inner(&self) -> &W {
        &self.inner
    }

    async fn drain(&mut self) -> std::io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let pending = self.buf.split();
        if let Err(e) = self.inner.write_all(&pending).await {
            self.poisoned = true;
            return Err(e);
        }
        self.bytes += pending.len() as u64;
        Ok(())
    }

    fn check_poisoned(&self) -> std::io::Result<()> {
        if self.poisoned {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "record stream is broken by an earlier write failure",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;

    /// Writer that fails every call.
    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer gone",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_records_are_newline_terminated() {
        let mut w = RecordWriter::new(Cursor::new(Vec::new()));
        w.write_record(b"c#one").await.unwrap();
        w.write_record(b"c#two").await.unwrap();
        assert_eq!(w.buffered(), 12);
        w.flush().await.unwrap();

        assert_eq!(w.records_written(), 2);
        assert_eq!(w.bytes_written(), 12);
        assert_eq!(w.inner().get_ref().as_slice(), b"c#one\nc#two\n");
    }

    #[tokio::test]
    async fn test_nothing_reaches_inner_before_flush() {
        let mut w = RecordWriter::new(Cursor::new(Vec::new()));
        w.write_record(b"d#row").await.unwrap();
        assert!(w.inner().get_ref().is_empty());
    }

    #[tokio::test]
    async fn test_high_water_drains_early() {
        let mut w = RecordWriter::with_high_water(Cursor::new(Vec::new()), 8);
        w.write_record(b"1234567").await.unwrap();
        assert_eq!(w.buffered(), 0);
        assert_eq!(w.inner().get_ref().len(), 8);
    }

    #[tokio::test]
    async fn test_write_failure_poisons() {
        let mut w = RecordWriter::with_high_water(FailingWriter, 1);
        let err = w.write_record(b"d#row").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert!(w.is_poisoned());

        assert!(w.write_record(b"d#next").await.is_err());
        assert!(w.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_flush_over_duplex() {
        let (client, mut server) = duplex(4096);
        let mut w = RecordWriter::new(client);
        w.write_record(b"h#***HANDSHAKE***#t").await.unwrap();
        w.flush().await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"h#***HANDSHAKE***#t\n");
    }
}
