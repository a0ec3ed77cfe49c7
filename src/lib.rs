//! ppmap - Port Pipe MAPer.
//!
//! Bridges a single TCP connection, as listening server or connecting client,
//! to a pair of pre-existing local byte-stream channels. Data a local process
//! writes into the write pipe is sent to the peer as length-prefixed frames;
//! frames from the peer are written into the read pipe.

pub mod channel;
pub mod cli;
pub mod common;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod supervisor;

pub use channel::{open_sink, open_source, ChannelReader, ChannelWriter};
pub use cli::Cli;
pub use common::{BridgeConfig, Role, DEFAULT_HOST, LISTEN_BACKLOG, READ_BUFFER_SIZE};
pub use endpoint::{Endpoint, EndpointReceiver, EndpointSender, Listener};
pub use error::{Error, ExitCode, Result, SocketStep};
pub use protocol::{
    Flow, FrameHandler, FrameReceiver, FrameSender, ProtocolError, ReceiveEnd, FRAME_HEADER_SIZE,
};
pub use relay::{inbound_relay, outbound_relay, Direction, RelayEnd, RelayOutcome};
pub use supervisor::{run_bridge, run_session, supervise, BridgeReport, Supervised};
