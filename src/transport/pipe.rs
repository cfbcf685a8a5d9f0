//! Named pipe channel.
//!
//! The consumer creates the pipe before the subscription starts; we only ever
//! open it for writing.
//!
//! - Unix: a fifo (or plain file) opened for append
//! - Windows: a named pipe client
//!
//! # Example
//!
//! ```ignore
//! use cdcwire::transport::PipeChannel;
//!
//! let mut pipe = PipeChannel::open("/var/run/cdc/orders.fifo").await?;
//! pipe.writer().write_record(b"c...").await?;
//! ```

use crate::error::{CdcWireError, Result};
use crate::writer::RecordWriter;

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::fs::{File, OpenOptions};

    /// Write side of the pipe.
    pub type PipeWriter = File;

    pub async fn open(path: &str) -> Result<PipeWriter> {
        let missing = || CdcWireError::PipeMissing {
            path: path.to_string(),
        };
        match tokio::fs::metadata(Path::new(path)).await {
            Ok(meta) if meta.is_dir() => return Err(missing()),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(e.into()),
        }
        // Opening a fifo blocks until a reader is attached.
        let file = OpenOptions::new().append(true).open(path).await?;
        Ok(file)
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

    /// Write side of the pipe.
    pub type PipeWriter = NamedPipeClient;

    pub async fn open(path: &str) -> Result<PipeWriter> {
        match ClientOptions::new().read(false).write(true).open(path) {
            Ok(client) => Ok(client),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CdcWireError::PipeMissing {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
use unix_impl as imp;
#[cfg(windows)]
use windows_impl as imp;

pub use imp::PipeWriter;

/// Open named pipe.
#[derive(Debug)]
pub struct PipeChannel {
    path: String,
    writer: RecordWriter<PipeWriter>,
}

impl PipeChannel {
    /// Open an existing pipe for append.
    ///
    /// Fails with [`CdcWireError::PipeMissing`] if the path does not exist or
    /// is a directory.
    pub async fn open(path: &str) -> Result<Self> {
        let inner = imp::open(path).await?;
        tracing::info!(path, "Named pipe opened for output");
        Ok(Self {
            path: path.to_string(),
            writer: RecordWriter::new(inner),
        })
    }

    /// Configured path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The record writer over the pipe.
    pub fn writer(&mut self) -> &mut RecordWriter<PipeWriter> {
        &mut self.writer
    }

    /// Whether an earlier write failure broke the stream.
    pub fn is_broken(&self) -> bool {
        self.writer.is_poisoned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.fifo");
        let err = PipeChannel::open(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, CdcWireError::PipeMissing { .. }));
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipeChannel::open(dir.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CdcWireError::PipeMissing { .. }));
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"x\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut pipe = PipeChannel::open(&path).await.unwrap();
        assert_eq!(pipe.path(), path);
        pipe.writer().write_record(b"c#one").await.unwrap();
        pipe.writer().flush().await.unwrap();

        assert_eq!(std::fs::read(file.path()).unwrap(), b"x\nc#one\n");
    }
}
