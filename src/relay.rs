//! The two unidirectional relays.
//!
//! Every await inside a relay is raced against the supervisor's shutdown
//! signal, so a relay blocked on any read or write returns promptly with
//! [`RelayEnd::Cancelled`] once its sibling has ended.

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::common::READ_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::protocol::{Flow, FrameHandler, FrameReceiver, FrameSender, ReceiveEnd};

/// Relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local write pipe to socket.
    Inbound,
    /// Socket to local read pipe.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound (pipe -> socket)"),
            Direction::Outbound => f.write_str("outbound (socket -> pipe)"),
        }
    }
}

/// Why a relay ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The local source reached end-of-stream.
    SourceClosed,
    /// The peer closed the connection at a frame boundary.
    PeerClosed,
    /// The frame handler ended the receive loop.
    Stopped,
    /// The supervisor told the relay to stop.
    Cancelled,
}

/// Result of one relay run.
pub type RelayOutcome = Result<RelayEnd>;

/// Opens the local source, then forwards chunks read from it to the peer,
/// one frame per chunk.
///
/// An open that has not completed when the shutdown signal arrives is
/// abandoned. `source` is dropped, and thereby closed, on every return path.
pub async fn inbound_relay<O, S, W>(
    open_source: O,
    sender: &mut FrameSender<W>,
    mut shutdown: broadcast::Receiver<()>,
) -> RelayOutcome
where
    O: Future<Output = Result<S>>,
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut source = tokio::select! {
        opened = open_source => opened?,
        _ = shutdown.recv() => return Ok(RelayEnd::Cancelled),
    };

    let mut buf = Vec::new();
    buf.try_reserve_exact(READ_BUFFER_SIZE)
        .map_err(|_| Error::OutOfMemory(READ_BUFFER_SIZE))?;
    buf.resize(READ_BUFFER_SIZE, 0);

    loop {
        let n = tokio::select! {
            read = source.read(&mut buf) => read?,
            _ = shutdown.recv() => return Ok(RelayEnd::Cancelled),
        };

        if n == 0 {
            tracing::debug!(frames = sender.frames_sent(), "local source reached end of stream");
            return Ok(RelayEnd::SourceClosed);
        }
        tracing::trace!(bytes = n, "read from local source");

        tokio::select! {
            sent = sender.send(&buf[..n]) => { sent?; }
            _ = shutdown.recv() => return Ok(RelayEnd::Cancelled),
        }
    }
}

/// Writes every frame in full to the local sink.
struct SinkWriter<K> {
    sink: K,
}

impl<K> FrameHandler for SinkWriter<K>
where
    K: AsyncWrite + Send + Unpin,
{
    async fn on_frame(&mut self, frame: Bytes) -> Result<Flow> {
        self.sink.write_all(&frame).await?;
        self.sink.flush().await?;
        tracing::trace!(bytes = frame.len(), "wrote frame to local sink");
        Ok(Flow::Continue)
    }
}

/// Opens the local sink, then delivers frames received from the peer to it.
///
/// While the sink is still opening the relay keeps reading the connection,
/// so a peer that closes is noticed even if no local consumer ever shows
/// up. At most one frame is held back until the sink is open. `sink` is
/// dropped, and thereby closed, on every return path.
pub async fn outbound_relay<R, O, K>(
    receiver: &mut FrameReceiver<R>,
    open_sink: O,
    mut shutdown: broadcast::Receiver<()>,
) -> RelayOutcome
where
    R: AsyncRead + Unpin,
    O: Future<Output = Result<K>>,
    K: AsyncWrite + Send + Unpin,
{
    tokio::pin!(open_sink);
    let mut held: Option<Bytes> = None;

    let sink = loop {
        tokio::select! {
            opened = &mut open_sink => break opened?,
            frame = receiver.next_frame(), if held.is_none() => match frame? {
                Some(frame) => held = Some(frame),
                None => {
                    tracing::debug!("peer closed the stream before the local sink opened");
                    return Ok(RelayEnd::PeerClosed);
                }
            },
            _ = shutdown.recv() => return Ok(RelayEnd::Cancelled),
        }
    };

    let mut writer = SinkWriter { sink };
    if let Some(frame) = held {
        tokio::select! {
            written = writer.on_frame(frame) => { written?; }
            _ = shutdown.recv() => return Ok(RelayEnd::Cancelled),
        }
    }

    tokio::select! {
        received = receiver.receive_loop(&mut writer) => match received? {
            ReceiveEnd::PeerClosed => Ok(RelayEnd::PeerClosed),
            ReceiveEnd::Stopped => Ok(RelayEnd::Stopped),
        },
        _ = shutdown.recv() => Ok(RelayEnd::Cancelled),
    }
}
