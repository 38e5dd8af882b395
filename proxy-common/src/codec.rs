//! msgpack framing for tunnel messages
//!
//! Frames carry no length prefix, so decoding is attempted against whatever is
//! buffered and an unexpected EOF from the msgpack reader means "wait for more".

use crate::protocol::{
    CloseRequest, ConnectRequest, ConnectResponse, DataPacket, Message, PingRequest, ProtocolError,
    TAG_CLOSE_REQUEST, TAG_CONNECT_REQUEST, TAG_CONNECT_RESPONSE, TAG_DATA_PACKET, TAG_PING_REQUEST,
};
use bytes::{Buf, BytesMut};
use serde::Deserialize;
use std::io::{self, Cursor};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelCodec;

impl TunnelCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for TunnelCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        match decode_frame(&mut cursor) {
            Ok(message) => {
                let consumed = cursor.position() as usize;
                src.advance(consumed);
                Ok(Some(message))
            }
            Err(err) if is_incomplete(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Encoder<Message> for TunnelCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut buf = Vec::with_capacity(16);
        rmp_serde::encode::write(&mut buf, &item.tag())?;
        match &item {
            Message::ConnectRequest(m) => rmp_serde::encode::write_named(&mut buf, m)?,
            Message::ConnectResponse(m) => rmp_serde::encode::write_named(&mut buf, m)?,
            Message::Close(m) => rmp_serde::encode::write_named(&mut buf, m)?,
            Message::Data(m) => rmp_serde::encode::write_named(&mut buf, m)?,
            Message::Ping(m) => rmp_serde::encode::write_named(&mut buf, m)?,
        }
        dst.extend_from_slice(&buf);
        Ok(())
    }
}

fn decode_frame(cursor: &mut Cursor<&[u8]>) -> Result<Message, ProtocolError> {
    let mut de = rmp_serde::Deserializer::new(cursor);
    let tag = u8::deserialize(&mut de)?;
    let message = match tag {
        TAG_CONNECT_REQUEST => Message::ConnectRequest(ConnectRequest::deserialize(&mut de)?),
        TAG_CONNECT_RESPONSE => Message::ConnectResponse(ConnectResponse::deserialize(&mut de)?),
        TAG_CLOSE_REQUEST => Message::Close(CloseRequest::deserialize(&mut de)?),
        TAG_DATA_PACKET => Message::Data(DataPacket::deserialize(&mut de)?),
        TAG_PING_REQUEST => Message::Ping(PingRequest::deserialize(&mut de)?),
        other => return Err(ProtocolError::UnknownTag(other)),
    };
    Ok(message)
}

fn is_incomplete(err: &ProtocolError) -> bool {
    use rmp_serde::decode::Error;

    match err {
        ProtocolError::Decode(Error::InvalidMarkerRead(e))
        | ProtocolError::Decode(Error::InvalidDataRead(e)) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
