use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use std::fmt;

/// Header value marking a body as a JSON encoded map.
pub const MAP_TRANSFORMATION: &str = "jms-map-json";

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers (key/value pairs) and the raw body bytes. When the same header
/// name appears more than once the first occurrence is the one that counts;
/// `get_header` and the parser both follow that rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// STOMP 1.0 wire rules: no header escaping, no implicit content-length.
    pub legacy_mode: bool,
    /// Always emit `content-length`, even for bodies without NUL bytes.
    pub length_hint: bool,
    /// Parsed `jms-map-json` body. When set, `to_bytes` serializes this
    /// value instead of `body`.
    map: Option<Value>,
    /// Names of headers that were received without a `:` separator.
    flags: Vec<String>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example, `"SEND"` or
    ///   `"SUBSCRIBE"`). Accepts any type convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
            legacy_mode: false,
            length_hint: false,
            map: None,
            flags: Vec::new(),
        }
    }

    /// Create a map frame whose body is the JSON serialization of `value`.
    ///
    /// The `transformation:jms-map-json` header is added so receivers can
    /// decode the body back into a structure.
    pub fn map(command: impl Into<String>, value: Value) -> Self {
        let mut frame = Self::new(command).header("transformation", MAP_TRANSFORMATION);
        frame.body = value.to_string().into_bytes();
        frame.map = Some(value);
        frame
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    ///
    /// Parameters
    /// - `body`: raw body bytes. Accepts any type convertible into `Vec<u8>`.
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.map = None;
        self
    }

    /// Request a RECEIPT from the server for this frame (builder style).
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header("receipt", receipt_id)
    }

    /// Switch the frame to STOMP 1.0 wire rules (builder style).
    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy_mode = legacy;
        self
    }

    /// Force a `content-length` header on encode (builder style).
    pub fn length_hint(mut self, hint: bool) -> Self {
        self.length_hint = hint;
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true when the header is present, including headers that were
    /// received without a value.
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k == key)
    }

    /// Set or remove a header.
    ///
    /// A `None` or empty value removes every occurrence of `key`; absent values
    /// are never sent. Otherwise the first occurrence is replaced in place, or
    /// the header is appended when missing.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        match value.filter(|v| !v.is_empty()) {
            None => {
                self.headers.retain(|(k, _)| k != key);
                self.flags.retain(|k| k != key);
            }
            Some(v) => {
                self.flags.retain(|k| k != key);
                match self.headers.iter_mut().find(|(k, _)| k == key) {
                    Some(entry) => entry.1 = v.to_string(),
                    None => self.headers.push((key.to_string(), v.to_string())),
                }
            }
        }
    }

    /// Headers that were received as a bare name with no `:value` part.
    pub fn flag_headers(&self) -> &[String] {
        &self.flags
    }

    pub(crate) fn push_flag(&mut self, key: String) {
        self.headers.push((key.clone(), String::new()));
        self.flags.push(key);
    }

    /// Returns the `message-id` header, assigning a random one first when the
    /// frame has none.
    ///
    /// ACK/NACK construction relies on every frame having an id, so a frame
    /// handed to it without one gets a stable generated id here.
    pub fn ensure_message_id(&mut self) -> &str {
        if self.get_header("message-id").is_none_or(str::is_empty) {
            let id = format!("{:032x}", rand::random::<u128>());
            self.set("message-id", Some(id.as_str()));
        }
        self.get_header("message-id").unwrap_or_default()
    }

    /// True when the frame carries a `jms-map-json` body.
    pub fn is_map(&self) -> bool {
        self.map.is_some()
    }

    /// The parsed structure of a map frame.
    pub fn map_body(&self) -> Option<&Value> {
        self.map.as_ref()
    }

    /// Replace the structure of a map frame.
    pub fn set_map_body(&mut self, value: Value) {
        self.map = Some(value);
        self.set("transformation", Some(MAP_TRANSFORMATION));
    }

    /// Attach the parsed JSON body if the frame declares the map
    /// transformation. Returns the JSON error when the body does not parse.
    pub(crate) fn classify_map(&mut self) -> Result<(), serde_json::Error> {
        if self.get_header("transformation") == Some(MAP_TRANSFORMATION) {
            self.map = Some(serde_json::from_slice(&self.body)?);
        }
        Ok(())
    }

    /// Encode the frame into its wire representation.
    ///
    /// Map frames are re-serialized from their structure first. Outside
    /// legacy mode a `content-length` header is injected (or overridden) when
    /// the body contains a NUL byte or `length_hint` is set, and header names
    /// and values are escaped. Legacy mode only escapes line feeds.
    pub fn to_bytes(&self) -> Bytes {
        let body: Vec<u8> = match &self.map {
            Some(value) => value.to_string().into_bytes(),
            None => self.body.clone(),
        };

        let mut dst = BytesMut::with_capacity(self.command.len() + body.len() + 64);
        dst.extend_from_slice(self.command.as_bytes());
        dst.put_u8(b'\n');

        let needs_length = !self.legacy_mode && (self.length_hint || body.contains(&0));
        let mut length_written = false;
        for (k, v) in &self.headers {
            if k == "content-length" {
                if !needs_length {
                    write_header(&mut dst, k, v, self.legacy_mode);
                } else if !length_written {
                    write_header(&mut dst, k, &body.len().to_string(), self.legacy_mode);
                    length_written = true;
                }
                continue;
            }
            write_header(&mut dst, k, v, self.legacy_mode);
        }
        if needs_length && !length_written {
            write_header(&mut dst, "content-length", &body.len().to_string(), false);
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&body);
        dst.put_u8(0);
        dst.freeze()
    }
}

fn write_header(dst: &mut BytesMut, key: &str, value: &str, legacy: bool) {
    if legacy {
        dst.extend_from_slice(escape_legacy(key).as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(escape_legacy(value).as_bytes());
    } else {
        dst.extend_from_slice(escape_header_value(key).as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(escape_header_value(value).as_bytes());
    }
    dst.put_u8(b'\n');
}

/// Escape a STOMP 1.1/1.2 header name or value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
pub fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// STOMP 1.0 has no escaping; only line feeds are neutralised so a value can
/// never break the header block.
fn escape_legacy(input: &str) -> String {
    input.replace('\n', "\\n")
}

/// Reverse `escape_header_value`. Unknown escape sequences are kept
/// verbatim rather than rejected.
pub fn unescape_header_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                tracing::debug!(escape = %other, "unknown header escape kept verbatim");
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// An ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or `"unknown error"`.
    pub message: String,
    /// The body decoded as UTF-8, when non-empty.
    pub body: Option<String>,
    /// The `receipt-id` header when the error answers a receipted frame.
    pub receipt_id: Option<String>,
    /// The original ERROR frame.
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
