//! Wire protocol implementation for ppmap.
//!
//! Every frame is a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. There is no type, version, or checksum field, and a
//! zero-length frame is a valid, distinct frame. The end of the stream is only
//! ever signalled by the transport closing at a frame boundary.

use bytes::{Buf, Bytes};
use std::future::Future;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Protocol error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("stream ended after {received} of 4 length prefix bytes")]
    TruncatedHeader { received: usize },

    #[error("stream ended after {received} of {expected} payload bytes")]
    TruncatedPayload { expected: u32, received: usize },

    #[error("payload of {0} bytes does not fit a 4-byte length prefix")]
    FrameTooLarge(usize),
}

/// What a [`FrameHandler`] wants the receive loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End the loop without an error.
    Stop,
}

/// Why [`FrameReceiver::receive_loop`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEnd {
    /// The peer closed the stream at a frame boundary.
    PeerClosed,
    /// The handler returned [`Flow::Stop`].
    Stopped,
}

/// Consumer of received frames.
///
/// Each frame is moved into the handler; once `on_frame` returns the handler
/// owns it. Returning an error ends the receive loop with that error.
pub trait FrameHandler {
    fn on_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<Flow>> + Send;
}

/// Write side of a framed connection.
#[derive(Debug)]
pub struct FrameSender<W> {
    inner: W,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Sends `payload` as one frame.
    ///
    /// Either the whole length prefix and payload reach the transport and the
    /// payload length is returned, or an error is returned. Partial writes are
    /// retried internally until everything is written.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize> {
        let length = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
        let header = length.to_be_bytes();

        let mut frame = Buf::chain(&header[..], payload);
        self.inner.write_all_buf(&mut frame).await?;
        self.inner.flush().await?;

        self.frames_sent += 1;
        self.bytes_sent += payload.len() as u64;
        tracing::trace!(bytes = payload.len(), "frame sent");

        Ok(payload.len())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A frame whose length prefix has arrived but whose payload is incomplete.
#[derive(Debug)]
struct PartialFrame {
    length: u32,
    payload: Vec<u8>,
}

impl PartialFrame {
    fn new(length: u32) -> Result<Self> {
        let expected = length as usize;
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(expected)
            .map_err(|_| Error::OutOfMemory(expected))?;
        Ok(Self { length, payload })
    }
}

/// Read side of a framed connection.
#[derive(Debug)]
pub struct FrameReceiver<R> {
    inner: R,
    header: [u8; FRAME_HEADER_SIZE],
    header_filled: usize,
    partial: Option<PartialFrame>,
    frames_received: u64,
    bytes_received: u64,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            header: [0u8; FRAME_HEADER_SIZE],
            header_filled: 0,
            partial: None,
            frames_received: 0,
            bytes_received: 0,
        }
    }

    /// Reads the next complete frame.
    ///
    /// Returns `Ok(None)` when the peer closes the stream before the first
    /// byte of a frame. A stream that closes anywhere inside a frame is a
    /// protocol violation.
    ///
    /// Cancel safe: bytes of a partially received frame are kept in the
    /// receiver, and the next call picks up where the dropped one stopped.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.partial.is_none() {
            let length = match self.read_header().await? {
                Some(length) => length,
                None => return Ok(None),
            };
            self.partial = Some(PartialFrame::new(length)?);
        }
        if let Some(partial) = self.partial.as_mut() {
            fill_payload(&mut self.inner, partial).await?;
        }
        let payload = self
            .partial
            .take()
            .map(|partial| Bytes::from(partial.payload))
            .unwrap_or_default();

        self.frames_received += 1;
        self.bytes_received += payload.len() as u64;
        tracing::trace!(bytes = payload.len(), "frame received");

        Ok(Some(payload))
    }

    /// Feeds every received frame to `handler` until the peer closes the
    /// stream, a read fails, or the handler stops the loop.
    pub async fn receive_loop<H: FrameHandler>(&mut self, handler: &mut H) -> Result<ReceiveEnd> {
        loop {
            let frame = match self.next_frame().await? {
                Some(frame) => frame,
                None => {
                    tracing::debug!(frames = self.frames_received, "peer closed the stream");
                    return Ok(ReceiveEnd::PeerClosed);
                }
            };

            if handler.on_frame(frame).await? == Flow::Stop {
                tracing::debug!(frames = self.frames_received, "frame handler stopped receiving");
                return Ok(ReceiveEnd::Stopped);
            }
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Accumulates the length prefix across partial reads.
    async fn read_header(&mut self) -> Result<Option<u32>> {
        while self.header_filled < FRAME_HEADER_SIZE {
            let n = self.inner.read(&mut self.header[self.header_filled..]).await?;
            if n == 0 {
                if self.header_filled == 0 {
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedHeader {
                    received: self.header_filled,
                }
                .into());
            }
            self.header_filled += n;
        }

        self.header_filled = 0;
        Ok(Some(u32::from_be_bytes(self.header)))
    }
}

/// Accumulates the rest of `partial`'s payload across partial reads.
async fn fill_payload<R>(inner: &mut R, partial: &mut PartialFrame) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let expected = partial.length as usize;

    while partial.payload.len() < expected {
        let remaining = (expected - partial.payload.len()) as u64;
        let n = (&mut *inner)
            .take(remaining)
            .read_buf(&mut partial.payload)
            .await?;
        if n == 0 {
            return Err(ProtocolError::TruncatedPayload {
                expected: partial.length,
                received: partial.payload.len(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::ReadBuf;

    /// Delivers its data one byte per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.pos < self.data.len() && buf.remaining() > 0 {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    struct Collect {
        frames: Vec<Bytes>,
        stop_after: Option<usize>,
    }

    impl FrameHandler for Collect {
        async fn on_frame(&mut self, frame: Bytes) -> Result<Flow> {
            self.frames.push(frame);
            match self.stop_after {
                Some(limit) if self.frames.len() >= limit => Ok(Flow::Stop),
                _ => Ok(Flow::Continue),
            }
        }
    }

    struct Failing;

    impl FrameHandler for Failing {
        async fn on_frame(&mut self, _frame: Bytes) -> Result<Flow> {
            Err(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
        }
    }

    fn encoded(frames: &[&[u8]]) -> Vec<u8> {
        let mut wire = Vec::new();
        for frame in frames {
            wire.extend_from_slice(&(frame.len() as u32).to_be_bytes());
            wire.extend_from_slice(frame);
        }
        wire
    }

    #[tokio::test]
    async fn test_send_writes_big_endian_prefix() {
        let mut sender = FrameSender::new(Vec::new());
        let sent = sender.send(b"abc").await.unwrap();

        assert_eq!(sent, 3);
        assert_eq!(sender.frames_sent(), 1);
        assert_eq!(sender.bytes_sent(), 3);
        assert_eq!(sender.into_inner(), vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_send_empty_frame() {
        let mut sender = FrameSender::new(Vec::new());
        assert_eq!(sender.send(b"").await.unwrap(), 0);
        assert_eq!(sender.frames_sent(), 1);
        assert_eq!(sender.into_inner(), vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_next_frame_keeps_order_and_empty_frames() {
        let wire = encoded(&[b"abc", b""]);
        let mut receiver = FrameReceiver::new(&wire[..]);

        assert_eq!(receiver.next_frame().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(receiver.next_frame().await.unwrap().unwrap(), Bytes::new());
        assert!(receiver.next_frame().await.unwrap().is_none());
        assert_eq!(receiver.frames_received(), 2);
        assert_eq!(receiver.bytes_received(), 3);
    }

    #[tokio::test]
    async fn test_reassembles_single_byte_reads() {
        let payload = b"split across many small deliveries".to_vec();
        let wire = encoded(&[&payload, b"x"]);
        let mut receiver = FrameReceiver::new(Trickle { data: wire, pos: 0 });

        assert_eq!(receiver.next_frame().await.unwrap().unwrap(), Bytes::from(payload));
        assert_eq!(receiver.next_frame().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(receiver.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_header_is_protocol_error() {
        let wire: &[u8] = &[0x00, 0x00];
        let mut receiver = FrameReceiver::new(wire);

        let err = receiver.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::TruncatedHeader { received: 2 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_protocol_error() {
        let wire: &[u8] = &[0x00, 0x00, 0x00, 0x05, b'a', b'b'];
        let mut receiver = FrameReceiver::new(wire);

        let err = receiver.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::TruncatedPayload {
                expected: 5,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_ends_on_peer_close() {
        let wire = encoded(&[b"one", b"two"]);
        let mut receiver = FrameReceiver::new(&wire[..]);
        let mut handler = Collect {
            frames: Vec::new(),
            stop_after: None,
        };

        let end = receiver.receive_loop(&mut handler).await.unwrap();
        assert_eq!(end, ReceiveEnd::PeerClosed);
        assert_eq!(handler.frames, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[tokio::test]
    async fn test_receive_loop_stops_when_handler_asks() {
        let wire = encoded(&[b"one", b"two", b"three"]);
        let mut receiver = FrameReceiver::new(&wire[..]);
        let mut handler = Collect {
            frames: Vec::new(),
            stop_after: Some(1),
        };

        let end = receiver.receive_loop(&mut handler).await.unwrap();
        assert_eq!(end, ReceiveEnd::Stopped);
        assert_eq!(handler.frames.len(), 1);
        assert_eq!(receiver.frames_received(), 1);
    }

    #[tokio::test]
    async fn test_receive_loop_propagates_handler_error() {
        let wire = encoded(&[b"one"]);
        let mut receiver = FrameReceiver::new(&wire[..]);

        let err = receiver.receive_loop(&mut Failing).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_dropped_read_resumes_mid_frame() {
        let (mut remote, local) = tokio::io::duplex(64);
        let mut receiver = FrameReceiver::new(local);

        // Prefix split across two writes, then part of the payload.
        remote.write_all(&[0x00, 0x00]).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), receiver.next_frame()).await;
        assert!(pending.is_err());

        remote.write_all(&[0x00, 0x05, b'h', b'e']).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), receiver.next_frame()).await;
        assert!(pending.is_err());

        remote.write_all(b"llo").await.unwrap();
        assert_eq!(receiver.next_frame().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        drop(remote);
        assert!(receiver.next_frame().await.unwrap().is_none());
        assert_eq!(receiver.frames_received(), 1);
    }

    #[tokio::test]
    async fn test_frames_survive_small_transport_buffer() {
        // An 8-byte pipe forces both sides through many partial writes and reads.
        let (client, server) = tokio::io::duplex(8);
        let mut sender = FrameSender::new(client);
        let mut receiver = FrameReceiver::new(server);

        let big: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let expected = big.clone();

        let send = async move {
            sender.send(&big).await.unwrap();
            sender.send(b"").await.unwrap();
            sender.send(b"tail").await.unwrap();
        };
        let recv = async {
            let mut frames = Vec::new();
            for _ in 0..3 {
                frames.push(receiver.next_frame().await.unwrap().unwrap());
            }
            frames
        };

        let ((), frames) = tokio::join!(send, recv);
        assert_eq!(frames[0], Bytes::from(expected));
        assert!(frames[1].is_empty());
        assert_eq!(frames[2], Bytes::from_static(b"tail"));
    }
}
