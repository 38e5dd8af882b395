//! Shared building blocks for the proxies lab
//!
//! - `protocol`: the message set spoken between the tunnel relay and its agent
//! - `codec`: msgpack framing of those messages over a byte stream
//! - `logging`: tracing subscriber bootstrap used by every binary

pub mod codec;
pub mod logging;
pub mod protocol;

pub use codec::TunnelCodec;
pub use logging::{init_logging, LoggingConfig};
pub use protocol::{
    CloseRequest, ConnectRequest, ConnectResponse, DataPacket, Message, PingRequest,
    ProtocolError,
};

/// Size of the read buffer used when pumping stream data into `DataPacket`s.
pub const READ_CHUNK_SIZE: usize = 32 * 1024;
