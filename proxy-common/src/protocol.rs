//! Tunnel message set
//!
//! Every frame on the relay <-> agent stream is a msgpack `u8` tag followed by
//! the msgpack map of the message fields. Field names are kept identical to
//! the ones the agent fleet already speaks (`IP`, `Port`, `ID`, ...).

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

pub const TAG_CONNECT_REQUEST: u8 = 1;
pub const TAG_CONNECT_RESPONSE: u8 = 2;
pub const TAG_CLOSE_REQUEST: u8 = 3;
pub const TAG_DATA_PACKET: u8 = 4;
pub const TAG_PING_REQUEST: u8 = 5;

/// Errors raised while framing or interpreting tunnel messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown payload type: {0}")]
    UnknownTag(u8),

    #[error("unexpected packet type: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("unrecognized address of {0} bytes")]
    InvalidAddress(usize),

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ask the agent to open a TCP connection to `IP:Port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "IP", with = "serde_bytes")]
    pub ip: Vec<u8>,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "ID")]
    pub id: u32,
}

/// Agent's answer to a `ConnectRequest`; `id` names the new stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    #[serde(rename = "Ok")]
    pub ok: bool,
    #[serde(rename = "ID")]
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    #[serde(rename = "ID")]
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Data", with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {}

/// One decoded tunnel frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    Close(CloseRequest),
    Data(DataPacket),
    Ping(PingRequest),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::ConnectRequest(_) => TAG_CONNECT_REQUEST,
            Message::ConnectResponse(_) => TAG_CONNECT_RESPONSE,
            Message::Close(_) => TAG_CLOSE_REQUEST,
            Message::Data(_) => TAG_DATA_PACKET,
            Message::Ping(_) => TAG_PING_REQUEST,
        }
    }

    /// Short name used in logs and `UnexpectedMessage` errors
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ConnectRequest(_) => "ConnectRequest",
            Message::ConnectResponse(_) => "ConnectResponse",
            Message::Close(_) => "CloseRequest",
            Message::Data(_) => "DataPacket",
            Message::Ping(_) => "PingRequest",
        }
    }

    pub fn data(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Message::Data(DataPacket {
            id,
            data: data.into(),
        })
    }

    pub fn close(id: u32) -> Self {
        Message::Close(CloseRequest { id })
    }

    pub fn connect_response(ok: bool, id: u32) -> Self {
        Message::ConnectResponse(ConnectResponse { ok, id })
    }

    /// Unwraps a `ConnectResponse`, rejecting every other message
    pub fn into_connect_response(self) -> Result<ConnectResponse, ProtocolError> {
        match self {
            Message::ConnectResponse(resp) => Ok(resp),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "ConnectResponse",
                got: other.kind(),
            }),
        }
    }
}

impl ConnectRequest {
    /// Connect request for the agent's loopback interface
    pub fn loopback(port: u16, id: u32) -> Self {
        Self {
            ip: Ipv4Addr::LOCALHOST.octets().to_vec(),
            port,
            id,
        }
    }

    /// Resolve `ip` + `port` into a socket address.
    ///
    /// 4 bytes are read as IPv4, 16 bytes as IPv6 (v4-mapped addresses are
    /// unmapped); any other length is rejected.
    pub fn socket_addr(&self) -> Result<SocketAddr, ProtocolError> {
        let ip = match self.ip.len() {
            4 => {
                let octets: [u8; 4] = self.ip[..].try_into().map_err(|_| ProtocolError::InvalidAddress(4))?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let octets: [u8; 16] = self.ip[..].try_into().map_err(|_| ProtocolError::InvalidAddress(16))?;
                let v6 = Ipv6Addr::from(octets);
                match v6.to_ipv4_mapped() {
                    Some(v4) => IpAddr::V4(v4),
                    None => IpAddr::V6(v6),
                }
            }
            other => return Err(ProtocolError::InvalidAddress(other)),
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}
