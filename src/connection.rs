use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::frame::{Frame, ServerError};
use crate::heartbeat::{Heartbeat, HeartbeatError};
use crate::observer::{ConnectionObserver, ObserverCollection};
use crate::parser::{ParseEvent, Parser};
use crate::protocol::{DEFAULT_ACCEPT_VERSION, Protocol, ProtocolError, Version};
use crate::session::StateError;
use crate::transport::{Clock, SystemClock, Transport};

/// Use this to disable heartbeats: "0,0".
pub const NO_HEARTBEAT: &str = "0,0";

/// Default heartbeat value: 10 seconds in both directions.
pub const DEFAULT_HEARTBEAT: &str = "10000,10000";

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 8192;

/// Errors returned by `Connection` and `Session` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The broker answered with an ERROR frame.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A frame could not be built for the negotiated version or dialect.
    #[error("cannot build frame: {0}")]
    Build(#[from] ProtocolError),
    /// The operation is not allowed in the current session state.
    #[error(transparent)]
    State(#[from] StateError),
    /// Liveness failure or heartbeat misconfiguration.
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// No CONNECTED frame arrived in time.
    #[error("no CONNECTED frame received within {0:?}")]
    ConnectTimeout(Duration),
    #[error("transport is not connected")]
    NotConnected,
}

/// Options for the CONNECT handshake.
///
/// # Example
///
/// ```ignore
/// let options = ConnectOptions::new()
///     .login("guest")
///     .passcode("guest")
///     .client_id("orders-service")
///     .heartbeat(Heartbeat::new(10000, 10000))
///     .header("custom-key", "custom-value");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Virtual host; `/` is sent when unset.
    pub host: Option<String>,
    /// Comma separated versions to offer; all supported versions when unset.
    pub accept_version: Option<String>,
    /// Required by brokers that key durable subscriptions on it.
    pub client_id: Option<String>,
    pub heartbeat: Heartbeat,
    /// Extra CONNECT headers. Protocol headers take precedence.
    pub headers: Vec<(String, String)>,
    /// How long to wait for CONNECTED.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login: None,
            passcode: None,
            host: None,
            accept_version: None,
            client_id: None,
            heartbeat: Heartbeat::disabled(),
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Restrict the offered versions, e.g. `"1.1,1.2"`.
    pub fn accept_version(mut self, versions: impl Into<String>) -> Self {
        self.accept_version = Some(versions.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn accepted_versions(&self) -> Result<Vec<Version>, ProtocolError> {
        Version::parse_list(
            self.accept_version
                .as_deref()
                .unwrap_or(DEFAULT_ACCEPT_VERSION),
        )
    }
}

/// Synchronous STOMP connection over a [`Transport`].
///
/// Owns the parser state for the incoming byte stream and the observers
/// watching it. Frames are returned strictly in arrival order; frames read
/// while waiting for a specific reply are held back and handed out by the
/// next [`Connection::read_frame`] calls.
pub struct Connection<T: Transport> {
    transport: T,
    parser: Parser,
    observers: ObserverCollection,
    stash: VecDeque<Frame>,
    clock: Box<dyn Clock>,
    receipt_counter: u64,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            parser: Parser::new(),
            observers: ObserverCollection::new(),
            stash: VecDeque::new(),
            clock: Box::new(SystemClock),
            receipt_counter: 0,
        }
    }

    /// Replace the system clock, e.g. with a
    /// [`ManualClock`](crate::ManualClock) in tests.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Register an observer; observers run in registration order.
    pub fn add_observer(&mut self, observer: impl ConnectionObserver + 'static) {
        self.observers.add(observer);
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Perform the CONNECT handshake.
    ///
    /// Sends CONNECT and waits up to `options.connect_timeout` for
    /// CONNECTED. The negotiated version must be one we offered; a server
    /// that omits the `version` header speaks STOMP 1.0.
    pub fn connect(&mut self, options: &ConnectOptions) -> Result<Protocol, ConnError> {
        let accepted = options.accepted_versions()?;
        self.write_frame(&Protocol::connect_frame(options))?;

        let deadline = self.clock.now() + options.connect_timeout;
        let connected = loop {
            match self.receive()? {
                Some(frame) if frame.command == "CONNECTED" => break frame,
                Some(frame) => {
                    return Err(ConnError::Protocol(format!(
                        "expected CONNECTED, got {}",
                        frame.command
                    )));
                }
                None if self.clock.now() >= deadline => {
                    warn!(timeout = ?options.connect_timeout, "no CONNECTED frame");
                    return Err(ConnError::ConnectTimeout(options.connect_timeout));
                }
                None => {}
            }
        };

        let version: Version = connected.get_header("version").unwrap_or("1.0").parse()?;
        if !accepted.contains(&version) {
            return Err(ConnError::Protocol(format!(
                "server negotiated STOMP {version}, which was not offered"
            )));
        }
        self.parser.set_legacy(version == Version::V1_0);

        let protocol = Protocol::new(
            options.client_id.clone(),
            version,
            connected.get_header("server").map(str::to_string),
        );
        debug!(
            %version,
            server = protocol.server().unwrap_or("unknown"),
            dialect = %protocol.dialect(),
            "connected"
        );
        Ok(protocol)
    }

    /// Encode and write one frame.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnError> {
        if !self.transport.is_connected() {
            return Err(ConnError::NotConnected);
        }
        self.transport.write(&frame.to_bytes())?;
        trace!(command = %frame.command, headers = frame.headers.len(), "frame sent");
        let now = self.clock.now();
        self.observers.frame_sent(frame, &mut self.transport, now)
    }

    /// Return the next frame, reading from the transport at most once.
    ///
    /// `Ok(None)` means nothing complete arrived yet; the transport read
    /// that produced no data is reported to observers as idle time. ERROR
    /// frames are returned as [`ConnError::Server`].
    pub fn read_frame(&mut self) -> Result<Option<Frame>, ConnError> {
        match self.stash.pop_front() {
            Some(frame) => deliver(frame),
            None => self.receive(),
        }
    }

    /// True when a complete frame can be returned without touching the
    /// transport.
    ///
    /// A buffered ERROR frame counts; it is reported by the next
    /// [`Connection::read_frame`], not here.
    pub fn has_buffered_frames(&mut self) -> Result<bool, ConnError> {
        if !self.stash.is_empty() {
            return Ok(true);
        }
        match self.poll_buffered()? {
            Some(frame) => {
                self.stash.push_back(frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write `frame` with a fresh `receipt` header and wait for the matching
    /// RECEIPT.
    ///
    /// Other frames arriving in the meantime are kept for
    /// [`Connection::read_frame`]. Returns the receipt id.
    pub fn write_frame_confirmed(
        &mut self,
        mut frame: Frame,
        timeout: Duration,
    ) -> Result<String, ConnError> {
        self.receipt_counter += 1;
        let receipt_id = format!("rcpt-{}", self.receipt_counter);
        frame.set("receipt", Some(receipt_id.as_str()));
        self.write_frame(&frame)?;
        self.wait_for_receipt(&receipt_id, timeout)?;
        Ok(receipt_id)
    }

    /// Wait for the RECEIPT answering `receipt_id`.
    pub fn wait_for_receipt(&mut self, receipt_id: &str, timeout: Duration) -> Result<(), ConnError> {
        debug!(receipt_id, ?timeout, "waiting for receipt");
        let deadline = self.clock.now() + timeout;
        loop {
            match self.receive()? {
                Some(frame)
                    if frame.command == "RECEIPT"
                        && frame.get_header("receipt-id") == Some(receipt_id) =>
                {
                    return Ok(());
                }
                Some(frame) => self.stash.push_back(frame),
                None => {}
            }
            // Checked after every read, busy or idle.
            if self.clock.now() >= deadline {
                warn!(receipt_id, ?timeout, stashed = self.stash.len(), "receipt timed out");
                return Err(ConnError::ReceiptTimeout(receipt_id.to_string()));
            }
        }
    }

    /// Send DISCONNECT, waiting for its receipt when `receipt_timeout` is
    /// given.
    pub fn disconnect(
        &mut self,
        protocol: &Protocol,
        receipt_timeout: Option<Duration>,
    ) -> Result<(), ConnError> {
        let frame = protocol.disconnect_frame();
        match receipt_timeout {
            Some(timeout) => self.write_frame_confirmed(frame, timeout).map(|_| ()),
            None => self.write_frame(&frame),
        }
    }

    /// Discard everything buffered but not yet returned.
    pub fn clear_buffers(&mut self) -> bool {
        let had_data = !self.stash.is_empty() || self.parser.buffered_len() > 0;
        self.stash.clear();
        self.parser.flush();
        had_data
    }

    // Buffered bytes first, then a single transport read.
    fn receive(&mut self) -> Result<Option<Frame>, ConnError> {
        if let Some(frame) = self.poll_buffered()? {
            return deliver(frame);
        }
        if !self.transport.is_connected() {
            return Err(ConnError::NotConnected);
        }
        let bytes = self.transport.read(READ_CHUNK)?;
        if bytes.is_empty() {
            let now = self.clock.now();
            self.observers.idle(&mut self.transport, now)?;
            return Ok(None);
        }
        self.parser.feed(&bytes);
        match self.poll_buffered()? {
            Some(frame) => deliver(frame),
            None => Ok(None),
        }
    }

    // Next complete frame from the parser, ERROR frames included. A frame an
    // observer rejects is stashed before the error is returned.
    fn poll_buffered(&mut self) -> Result<Option<Frame>, ConnError> {
        while let Some(event) = self.parser.next_event() {
            let now = self.clock.now();
            match event {
                ParseEvent::Heartbeat => self.observers.empty_line_received(now),
                ParseEvent::Frame(frame) => {
                    trace!(command = %frame.command, headers = frame.headers.len(), "frame received");
                    if let Err(e) = self
                        .observers
                        .frame_received(&frame, &mut self.transport, now)
                    {
                        self.stash.push_back(frame);
                        return Err(e);
                    }
                    return Ok(Some(frame));
                }
            }
        }
        Ok(None)
    }
}

// Hand a frame to the caller, turning ERROR into `ConnError::Server`.
fn deliver(frame: Frame) -> Result<Option<Frame>, ConnError> {
    if frame.command == "ERROR" {
        return Err(ServerError::from_frame(frame).into());
    }
    Ok(Some(frame))
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("parser", &self.parser)
            .field("observers", &self.observers)
            .field("stashed", &self.stash.len())
            .finish()
    }
}
