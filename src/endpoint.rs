//! TCP connection setup and teardown for both roles.
//!
//! An [`Endpoint`] owns exactly one connected socket, already split into a
//! framed write half and a framed read half so the two relays can use the
//! directions independently without locking.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::common::{BridgeConfig, Role, LISTEN_BACKLOG};
use crate::error::{Error, Result, SocketStep};
use crate::protocol::{FrameReceiver, FrameSender};

/// Framed write half of an endpoint's connection.
pub type EndpointSender = FrameSender<OwnedWriteHalf>;

/// Framed read half of an endpoint's connection.
pub type EndpointReceiver = FrameReceiver<OwnedReadHalf>;

fn new_socket(addr: SocketAddr) -> Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    };
    socket.map_err(|e| Error::socket(SocketStep::Create, e))
}

/// Server-role socket that is listening but has not accepted its peer yet.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Creates, binds, and listens with a backlog of one.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = new_socket(addr)?;
        socket
            .bind(addr)
            .map_err(|e| Error::socket(SocketStep::Bind, e))?;
        let inner = socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| Error::socket(SocketStep::Listen, e))?;

        tracing::debug!(%addr, "listening");
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accepts the single peer. The listening socket is closed on return.
    pub async fn accept(self) -> Result<Endpoint> {
        let (stream, peer_addr) = self
            .inner
            .accept()
            .await
            .map_err(|e| Error::socket(SocketStep::Accept, e))?;

        tracing::info!(%peer_addr, "accepted peer connection");
        Ok(Endpoint::from_stream(Role::Server, peer_addr, stream))
    }
}

/// One connected TCP socket with framed halves.
#[derive(Debug)]
pub struct Endpoint {
    role: Role,
    peer_addr: SocketAddr,
    sender: EndpointSender,
    receiver: EndpointReceiver,
}

impl Endpoint {
    /// Sets up the connection for `config.role`.
    ///
    /// Any resource created before a failing step is released before the
    /// error is returned.
    pub async fn open(config: &BridgeConfig) -> Result<Self> {
        let addr = config.socket_addr();
        match config.role {
            Role::Server => Listener::bind(addr)?.accept().await,
            Role::Client => Self::connect(addr).await,
        }
    }

    /// Client-role setup.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let socket = new_socket(addr)?;
        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| Error::socket(SocketStep::Connect, e))?;

        tracing::info!(peer_addr = %addr, "connected to peer");
        Ok(Self::from_stream(Role::Client, addr, stream))
    }

    fn from_stream(role: Role, peer_addr: SocketAddr, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            role,
            peer_addr,
            sender: FrameSender::new(write_half),
            receiver: FrameReceiver::new(read_half),
        }
    }

    /// Reassembles an endpoint from the halves handed out by [`Endpoint::into_parts`].
    pub fn from_parts(
        role: Role,
        peer_addr: SocketAddr,
        sender: EndpointSender,
        receiver: EndpointReceiver,
    ) -> Self {
        Self {
            role,
            peer_addr,
            sender,
            receiver,
        }
    }

    pub fn into_parts(self) -> (EndpointSender, EndpointReceiver) {
        (self.sender, self.receiver)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn sender(&mut self) -> &mut EndpointSender {
        &mut self.sender
    }

    pub fn receiver(&mut self) -> &mut EndpointReceiver {
        &mut self.receiver
    }

    /// Shuts down both directions and releases the socket.
    ///
    /// Consumes the endpoint, so it can only run once; dropping an endpoint
    /// without closing it still releases the descriptor. A peer that has
    /// already torn the connection down is not an error.
    pub fn close(self) -> Result<()> {
        let read_half = self.receiver.into_inner();
        let write_half = self.sender.into_inner();
        let stream = read_half
            .reunite(write_half)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let stream = stream.into_std()?;

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => {
                tracing::debug!(peer_addr = %self.peer_addr, "connection already shut down by peer");
            }
            Err(e) => return Err(Error::socket(SocketStep::Shutdown, e)),
        }

        tracing::debug!(role = %self.role, peer_addr = %self.peer_addr, "connection closed");
        Ok(())
    }
}
