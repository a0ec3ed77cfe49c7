//! Local byte-stream channels (the "read pipe" and "write pipe").
//!
//! Channels must already exist. FIFOs are opened with ordinary blocking-open
//! semantics, so opening waits until the local process opens the other end,
//! and are then driven without blocking through `tokio::net::unix::pipe`.
//! Anything else (regular files, character devices) goes through
//! `tokio::fs::File`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Source the inbound relay reads from.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;

/// Sink the outbound relay writes to.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens `path` for reading.
///
/// For a FIFO this waits until the local producer opens the other end.
pub async fn open_source(path: &Path) -> Result<ChannelReader> {
    let file = open_blocking(path, OpenOptions::new().read(true)).await?;
    let path = path.to_path_buf();

    #[cfg(unix)]
    if is_fifo(&file) {
        let receiver = tokio::net::unix::pipe::Receiver::from_file(file)
            .map_err(|source| Error::ChannelOpen { path: path.clone(), source })?;
        tracing::debug!(path = %path.display(), "opened FIFO source");
        return Ok(Box::new(receiver));
    }

    tracing::debug!(path = %path.display(), "opened file source");
    Ok(Box::new(tokio::fs::File::from_std(file)))
}

/// Opens `path` for writing. Regular files are truncated first.
///
/// For a FIFO this waits until the local consumer opens the other end.
pub async fn open_sink(path: &Path) -> Result<ChannelWriter> {
    let file = open_blocking(path, OpenOptions::new().write(true).truncate(true)).await?;
    let path = path.to_path_buf();

    #[cfg(unix)]
    if is_fifo(&file) {
        let sender = tokio::net::unix::pipe::Sender::from_file(file)
            .map_err(|source| Error::ChannelOpen { path: path.clone(), source })?;
        tracing::debug!(path = %path.display(), "opened FIFO sink");
        return Ok(Box::new(sender));
    }

    tracing::debug!(path = %path.display(), "opened file sink");
    Ok(Box::new(tokio::fs::File::from_std(file)))
}

/// Runs the (possibly indefinitely blocking) open on the blocking pool.
async fn open_blocking(path: &Path, options: &OpenOptions) -> Result<File> {
    let owned: PathBuf = path.to_path_buf();
    let options = options.clone();

    let opened = tokio::task::spawn_blocking(move || options.open(&owned))
        .await
        .map_err(|e| Error::RelayTask(format!("channel open task failed: {}", e)))?;

    opened.map_err(|source| Error::ChannelOpen {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn is_fifo(file: &File) -> bool {
    use std::os::unix::fs::FileTypeExt;

    file.metadata()
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_missing_source_is_channel_open_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = open_source(&missing).await.err().unwrap();
        match err {
            Error::ChannelOpen { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_sink_is_not_created() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");

        assert!(open_sink(&missing).await.is_err());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_file_channels_read_and_write() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("output");
        std::fs::write(&input, b"from producer").unwrap();
        std::fs::write(&output, b"stale contents that must go away").unwrap();

        let mut source = open_source(&input).await.unwrap();
        let mut sink = open_sink(&output).await.unwrap();

        let mut read = Vec::new();
        source.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, b"from producer");

        sink.write_all(b"to consumer").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        assert_eq!(std::fs::read(&output).unwrap(), b"to consumer");
    }
}
