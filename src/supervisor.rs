//! Bridge supervision: runs both relays and tears everything down as soon as
//! either of them ends.

use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinError;

use crate::channel::{open_sink, open_source};
use crate::common::BridgeConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::{FrameReceiver, FrameSender};
use crate::relay::{inbound_relay, outbound_relay, Direction, RelayOutcome};

/// Summary of a finished bridge session.
#[derive(Debug)]
pub struct BridgeReport {
    /// The relay whose completion triggered the teardown.
    pub first_ended: Direction,
    pub inbound: RelayOutcome,
    pub outbound: RelayOutcome,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
}

impl BridgeReport {
    /// Logs how each relay ended.
    pub fn log(&self) {
        tracing::info!(
            first_ended = %self.first_ended,
            frames_sent = self.frames_sent,
            bytes_sent = self.bytes_sent,
            frames_received = self.frames_received,
            bytes_received = self.bytes_received,
            "bridge finished"
        );
        log_outcome(Direction::Inbound, &self.inbound);
        log_outcome(Direction::Outbound, &self.outbound);
    }

    /// Turns a local channel that could not be opened into a setup error.
    ///
    /// Every other relay failure leaves the report as it is.
    pub fn into_setup_result(self) -> Result<Self> {
        if let Err(e @ Error::ChannelOpen { .. }) = self.inbound {
            return Err(e);
        }
        if let Err(e @ Error::ChannelOpen { .. }) = self.outbound {
            return Err(e);
        }
        Ok(self)
    }
}

fn log_outcome(direction: Direction, outcome: &RelayOutcome) {
    match outcome {
        Ok(end) => tracing::debug!(%direction, ?end, "relay ended"),
        Err(e) => tracing::warn!(%direction, error = %e, "relay failed"),
    }
}

/// Framed halves handed back by [`supervise`] together with the report.
///
/// A half is `None` when its relay task panicked; it was dropped with the
/// task, and its counters read as zero in the report.
#[derive(Debug)]
pub struct Supervised<R, W> {
    pub sender: Option<FrameSender<W>>,
    pub receiver: Option<FrameReceiver<R>>,
    pub report: BridgeReport,
}

fn unpack_task<T>(
    direction: Direction,
    joined: std::result::Result<(T, RelayOutcome), JoinError>,
) -> (Option<T>, RelayOutcome) {
    match joined {
        Ok((half, outcome)) => (Some(half), outcome),
        Err(e) => (
            None,
            Err(Error::RelayTask(format!("{} relay task panicked: {}", direction, e))),
        ),
    }
}

/// Runs the inbound and outbound relays as two tasks until one of them ends,
/// then signals the other and waits for it.
///
/// Each relay opens its own local channel first, so a channel that never
/// opens holds up only its own direction. The framed halves are returned so
/// the caller can close the connection once nothing uses it any more.
pub async fn supervise<R, W, OS, S, OK, K>(
    sender: FrameSender<W>,
    receiver: FrameReceiver<R>,
    open_source: OS,
    open_sink: OK,
) -> Supervised<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    OS: Future<Output = Result<S>> + Send + 'static,
    S: AsyncRead + Unpin + Send + 'static,
    OK: Future<Output = Result<K>> + Send + 'static,
    K: AsyncWrite + Unpin + Send + 'static,
{
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let inbound_shutdown = shutdown_tx.subscribe();
    let mut inbound_task = tokio::spawn(async move {
        let mut sender = sender;
        let outcome = inbound_relay(open_source, &mut sender, inbound_shutdown).await;
        (sender, outcome)
    });

    let outbound_shutdown = shutdown_tx.subscribe();
    let mut outbound_task = tokio::spawn(async move {
        let mut receiver = receiver;
        let outcome = outbound_relay(&mut receiver, open_sink, outbound_shutdown).await;
        (receiver, outcome)
    });

    let (first_ended, inbound, outbound) = tokio::select! {
        joined = &mut inbound_task => (Direction::Inbound, Some(joined), None),
        joined = &mut outbound_task => (Direction::Outbound, None, Some(joined)),
    };
    tracing::debug!(%first_ended, "relay ended, stopping the other one");
    let _ = shutdown_tx.send(());

    let inbound = match inbound {
        Some(joined) => joined,
        None => inbound_task.await,
    };
    let outbound = match outbound {
        Some(joined) => joined,
        None => outbound_task.await,
    };

    let (sender, inbound) = unpack_task(Direction::Inbound, inbound);
    let (receiver, outbound) = unpack_task(Direction::Outbound, outbound);

    let report = BridgeReport {
        first_ended,
        inbound,
        outbound,
        frames_sent: sender.as_ref().map_or(0, |s| s.frames_sent()),
        bytes_sent: sender.as_ref().map_or(0, |s| s.bytes_sent()),
        frames_received: receiver.as_ref().map_or(0, |r| r.frames_received()),
        bytes_received: receiver.as_ref().map_or(0, |r| r.bytes_received()),
    };

    Supervised {
        sender,
        receiver,
        report,
    }
}

/// Runs one session over an already connected endpoint.
///
/// Relays until either direction ends, then closes the connection. A local
/// channel that fails to open is returned as an error once the connection
/// is closed; anything else that goes wrong only shows up in the report.
pub async fn run_session(
    endpoint: Endpoint,
    read_pipe: &Path,
    write_pipe: &Path,
) -> Result<BridgeReport> {
    tracing::info!(
        read_pipe = %read_pipe.display(),
        write_pipe = %write_pipe.display(),
        "connected, relaying"
    );

    let role = endpoint.role();
    let peer_addr = endpoint.peer_addr();
    let (sender, receiver) = endpoint.into_parts();

    let source_path = write_pipe.to_path_buf();
    let sink_path = read_pipe.to_path_buf();
    let supervised = supervise(
        sender,
        receiver,
        async move { open_source(&source_path).await },
        async move { open_sink(&sink_path).await },
    )
    .await;

    match (supervised.sender, supervised.receiver) {
        (Some(sender), Some(receiver)) => {
            let endpoint = Endpoint::from_parts(role, peer_addr, sender, receiver);
            if let Err(e) = endpoint.close() {
                tracing::warn!(error = %e, "failed to close connection");
            }
        }
        _ => tracing::debug!("connection half lost with a relay task, dropping the rest"),
    }

    supervised.report.into_setup_result()
}

/// Sets up the connection described by `config` and runs one session on it.
pub async fn run_bridge(config: &BridgeConfig) -> Result<BridgeReport> {
    tracing::info!(role = %config.role, addr = %config.socket_addr(), "opening connection");
    let endpoint = Endpoint::open(config).await?;
    run_session(endpoint, &config.read_pipe, &config.write_pipe).await
}
