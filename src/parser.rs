// Incremental STOMP frame parser over an append-only byte buffer.
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::frame::{Frame, unescape_header_value};

/// One unit produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A run of bare line endings (or stray NULs) between frames.
    Heartbeat,
    /// A complete frame.
    Frame(Frame),
}

/// Where the parser is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserMode {
    /// Looking for the end of a header block.
    Header,
    /// Header block consumed, waiting for the body and its terminator.
    Body,
}

/// Incremental parser turning arbitrary byte chunks into frames.
///
/// Bytes are appended with [`Parser::feed`]; [`Parser::next_event`] extracts at
/// most one heartbeat run or frame per call. Header metadata extracted for a
/// frame whose body has not fully arrived yet is kept across feeds, so a
/// frame can be split at any byte boundary.
#[derive(Debug)]
pub struct Parser {
    buffer: BytesMut,
    mode: ParserMode,
    legacy: bool,
    command: String,
    headers: Vec<(String, String)>,
    flags: Vec<String>,
    expected_length: Option<usize>,
    // Resume point for the header terminator search, then for the NUL scan
    // of a body without content-length.
    scan_from: usize,
    heartbeats: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            mode: ParserMode::Header,
            legacy: false,
            command: String::new(),
            headers: Vec::new(),
            flags: Vec::new(),
            expected_length: None,
            scan_from: 0,
            heartbeats: 0,
        }
    }

    /// Builder variant of [`Parser::set_legacy`].
    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// STOMP 1.0 mode: header values are taken verbatim and stray NUL bytes
    /// between frames are not skipped.
    pub fn set_legacy(&mut self, legacy: bool) {
        self.legacy = legacy;
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    /// Number of bytes received but not yet turned into an event.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next frame, skipping heartbeats.
    ///
    /// Heartbeat runs met on the way are counted; see
    /// [`Parser::take_heartbeats`]. Call repeatedly until `None` to drain
    /// every frame already buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next_event()? {
                ParseEvent::Heartbeat => self.heartbeats += 1,
                ParseEvent::Frame(frame) => return Some(frame),
            }
        }
    }

    /// Heartbeat runs skipped by `next_frame` since the last call.
    pub fn take_heartbeats(&mut self) -> usize {
        std::mem::take(&mut self.heartbeats)
    }

    /// Discard all parse state and return the bytes that were still
    /// buffered.
    pub fn flush(&mut self) -> Bytes {
        self.reset_frame();
        self.heartbeats = 0;
        self.buffer.split().freeze()
    }

    /// Run one extraction pass.
    ///
    /// Returns `None` when the buffer does not yet hold a complete heartbeat
    /// run or frame; whatever was extracted so far is retained.
    pub fn next_event(&mut self) -> Option<ParseEvent> {
        if self.mode == ParserMode::Header {
            let skipped = self
                .buffer
                .iter()
                .take_while(|&&b| b == b'\n' || b == b'\r' || (b == 0 && !self.legacy))
                .count();
            if skipped > 0 {
                self.buffer.advance(skipped);
                trace!(bytes = skipped, "heartbeat");
                return Some(ParseEvent::Heartbeat);
            }

            let Some((block_end, separator_len)) = find_header_end(&self.buffer, self.scan_from)
            else {
                // A terminator is at most four bytes, so the last three may
                // still start one.
                self.scan_from = self.buffer.len().saturating_sub(3);
                return None;
            };
            let block = self.buffer.split_to(block_end + separator_len);
            self.extract_meta(&block[..block_end]);
            self.mode = ParserMode::Body;
            self.scan_from = 0;
        }

        let (body_len, consumed) = match self.expected_length {
            Some(len) => {
                // The terminator must be buffered too before the frame is
                // complete.
                if self.buffer.len() <= len {
                    return None;
                }
                if self.buffer[len] == 0 {
                    (len, len + 1)
                } else {
                    debug!(
                        content_length = len,
                        "content-length body not followed by NUL"
                    );
                    (len, len)
                }
            }
            None => match self.buffer[self.scan_from..].iter().position(|&b| b == 0) {
                Some(rel) => {
                    let end = self.scan_from + rel;
                    (end, end + 1)
                }
                None => {
                    self.scan_from = self.buffer.len();
                    return None;
                }
            },
        };

        let chunk = self.buffer.split_to(consumed);
        let frame = self.materialize(chunk[..body_len].to_vec());
        self.reset_frame();
        Some(ParseEvent::Frame(frame))
    }

    fn extract_meta(&mut self, block: &[u8]) {
        let mut lines = block.split(|&b| b == b'\n').map(strip_cr);
        self.command = lines
            .next()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .unwrap_or_default();

        for line in lines {
            let (name, value) = match line.iter().position(|&b| b == b':') {
                Some(colon) => (
                    self.decode(&line[..colon]),
                    Some(self.decode(&line[colon + 1..])),
                ),
                None => {
                    debug!(line = %String::from_utf8_lossy(line), "header line without separator");
                    (self.decode(line), None)
                }
            };
            if self.headers.iter().any(|(k, _)| *k == name) {
                continue;
            }
            match value {
                Some(value) if name == "content-length" => match value.trim().parse::<usize>() {
                    Ok(len) => {
                        self.expected_length = Some(len);
                        self.headers.push((name, value));
                    }
                    Err(_) => {
                        debug!(value = %value, "unparsable content-length ignored");
                        self.headers.push((name.clone(), String::new()));
                        self.flags.push(name);
                    }
                },
                Some(value) => self.headers.push((name, value)),
                None => {
                    self.headers.push((name.clone(), String::new()));
                    self.flags.push(name);
                }
            }
        }
    }

    fn decode(&self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        if self.legacy {
            text.into_owned()
        } else {
            unescape_header_value(&text)
        }
    }

    fn materialize(&mut self, body: Vec<u8>) -> Frame {
        let mut frame = Frame::new(std::mem::take(&mut self.command)).set_body(body);
        frame.legacy_mode = self.legacy;
        let flags = std::mem::take(&mut self.flags);
        for (name, value) in std::mem::take(&mut self.headers) {
            if flags.contains(&name) {
                frame.push_flag(name);
            } else {
                frame.headers.push((name, value));
            }
        }
        if let Err(e) = frame.classify_map() {
            warn!(error = %e, "jms-map-json body is not valid JSON, keeping raw body");
        }
        frame
    }

    fn reset_frame(&mut self) {
        self.mode = ParserMode::Header;
        self.command.clear();
        self.headers.clear();
        self.flags.clear();
        self.expected_length = None;
        self.scan_from = 0;
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Position of the first header terminator (`\r\n\r\n` or `\n\n`) at or
/// after `from`, and its length.
fn find_header_end(input: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..input.len()).find_map(|i| {
        let rest = &input[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}
