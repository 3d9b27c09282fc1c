use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::parser::{ParseEvent, Parser, ParserMode};

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing one run of bare line endings received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A heartbeat pulse
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol, for hosts that drive the engine from an async
/// runtime.
///
/// Decoding moves every received byte into an internal [`Parser`], so a
/// frame split across reads is reassembled there; encoding uses
/// [`Frame::to_bytes`].
#[derive(Debug, Default)]
pub struct StompCodec {
    parser: Parser,
}

impl StompCodec {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    /// A codec for STOMP 1.0 peers (no header escaping).
    pub fn legacy() -> Self {
        Self {
            parser: Parser::new().legacy(true),
        }
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// All of `src` is consumed on every call; bytes that do not yet form a
    /// complete item stay in the parser until the next call.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a heartbeat run or full frame is ready.
    /// - `Ok(None)` when more bytes are required.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.parser.feed(&chunk);
        }
        Ok(self.parser.next_event().map(|event| match event {
            ParseEvent::Heartbeat => StompItem::Heartbeat,
            ParseEvent::Frame(frame) => StompItem::Frame(frame),
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if self.parser.buffered_len() == 0 && self.parser.mode() == ParserMode::Header => {
                Ok(None)
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "stream closed with {} bytes of an incomplete frame",
                    self.parser.buffered_len()
                ),
            )),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Encode a `StompItem` into the provided destination buffer.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => dst.put_u8(b'\n'),
            StompItem::Frame(frame) => dst.extend_from_slice(&frame.to_bytes()),
        }
        Ok(())
    }
}
