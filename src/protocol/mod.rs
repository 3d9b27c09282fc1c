//! Outgoing frame construction per negotiated STOMP version and broker
//! dialect.
//!
//! A [`Protocol`] is created once per successful CONNECT handshake and never
//! changes afterwards. Every builder validates its arguments before a frame
//! exists, so a construction error never leaves a half-built frame behind.

mod dialect;

pub use dialect::Dialect;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::connection::ConnectOptions;
use crate::frame::Frame;

/// Versions offered on CONNECT when the caller does not restrict them.
pub const DEFAULT_ACCEPT_VERSION: &str = "1.0,1.1,1.2";

/// Prefetch value used by the ActiveMQ and RabbitMQ dialects.
pub const DEFAULT_PREFETCH: u32 = 1;

/// Errors raised while building a frame, before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("'{0}' is not a valid ack value")]
    InvalidAckMode(String),
    #[error("'{mode}' is not a valid ack value for STOMP {version}")]
    UnsupportedAckMode { mode: AckMode, version: Version },
    #[error("STOMP {0} does not support NACK")]
    NackUnsupported(Version),
    #[error("unsupported STOMP version '{0}'")]
    UnsupportedVersion(String),
    #[error("frame has neither an ack nor a message-id header")]
    MissingMessageId,
    #[error("the requeue option is not supported by the {0} dialect")]
    RequeueNotSupported(Dialect),
    #[error("durable subscriptions require a client-id")]
    DurableRequiresClientId,
}

impl ProtocolError {
    /// True for argument combinations the caller should never have passed
    /// for this broker, as opposed to requests the protocol version rejects.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::RequeueNotSupported(_) | ProtocolError::DurableRequiresClientId
        )
    }
}

/// STOMP protocol versions, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse a comma separated `accept-version` list.
    pub fn parse_list(list: &str) -> Result<Vec<Version>, ProtocolError> {
        list.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::parse::<Version>)
            .collect()
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            "1.2" => Ok(Version::V1_2),
            other => Err(ProtocolError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    /// Available from STOMP 1.1.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    fn min_version(&self) -> Version {
        match self {
            AckMode::Auto | AckMode::Client => Version::V1_0,
            AckMode::ClientIndividual => Version::V1_1,
        }
    }
}

impl FromStr for AckMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(ProtocolError::InvalidAckMode(other.to_string())),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame builder bound to one negotiated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    client_id: Option<String>,
    version: Version,
    server: Option<String>,
    dialect: Dialect,
    prefetch: u32,
}

impl Protocol {
    /// Build a protocol for the negotiated `version`; the dialect is picked
    /// from the `server` banner of the CONNECTED frame.
    pub fn new(client_id: Option<String>, version: Version, server: Option<String>) -> Self {
        let dialect = Dialect::from_server(server.as_deref());
        Self {
            client_id,
            version,
            server,
            dialect,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Prefetch window sent by dialects that support one.
    pub fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn prefetch(&self) -> u32 {
        self.prefetch
    }

    /// True when the negotiated version is `version` or newer.
    pub fn has_version(&self, version: Version) -> bool {
        self.version >= version
    }

    fn create_frame(&self, command: &str) -> Frame {
        Frame::new(command).legacy(self.version == Version::V1_0)
    }

    /// CONNECT frame for `options`.
    ///
    /// The version is not known before the server answers, so the frame is
    /// always encoded with STOMP 1.0 wire rules.
    pub fn connect_frame(options: &ConnectOptions) -> Frame {
        let mut frame = Frame::new("CONNECT").legacy(true);
        let login = options.login.as_deref().unwrap_or_default();
        let passcode = options.passcode.as_deref().unwrap_or_default();
        if !login.is_empty() || !passcode.is_empty() {
            frame = frame.header("login", login).header("passcode", passcode);
        }
        frame.set("client-id", options.client_id.as_deref());
        frame.set(
            "accept-version",
            Some(
                options
                    .accept_version
                    .as_deref()
                    .unwrap_or(DEFAULT_ACCEPT_VERSION),
            ),
        );
        frame.set("host", Some(options.host.as_deref().unwrap_or("/")));
        frame.set("heart-beat", Some(options.heartbeat.to_string().as_str()));
        for (k, v) in &options.headers {
            if !frame.has_header(k) {
                frame.headers.push((k.clone(), v.clone()));
            }
        }
        frame
    }

    /// SUBSCRIBE frame.
    ///
    /// `client-individual` acknowledgement requires STOMP 1.1. A durable
    /// subscription is expressed through dialect specific headers; the
    /// generic dialect has none and ignores the flag.
    pub fn subscribe_frame(
        &self,
        destination: &str,
        subscription_id: Option<&str>,
        ack: AckMode,
        selector: Option<&str>,
        durable: bool,
    ) -> Result<Frame, ProtocolError> {
        if !self.has_version(ack.min_version()) {
            return Err(ProtocolError::UnsupportedAckMode {
                mode: ack,
                version: self.version,
            });
        }
        let mut frame = self.create_frame("SUBSCRIBE");
        frame.set("destination", Some(destination));
        frame.set("ack", Some(ack.as_str()));
        frame.set("id", subscription_id);
        frame.set("selector", selector);
        self.dialect.decorate_subscribe(
            &mut frame,
            self,
            subscription_id.unwrap_or(destination),
            durable,
        )?;
        Ok(frame)
    }

    /// UNSUBSCRIBE frame; durable subscriptions repeat the dialect's naming
    /// headers so the broker can match them.
    pub fn unsubscribe_frame(
        &self,
        destination: &str,
        subscription_id: Option<&str>,
        durable: bool,
    ) -> Result<Frame, ProtocolError> {
        let mut frame = self.create_frame("UNSUBSCRIBE");
        frame.set("destination", Some(destination));
        frame.set("id", subscription_id);
        self.dialect.decorate_unsubscribe(
            &mut frame,
            self,
            subscription_id.unwrap_or(destination),
            durable,
        )?;
        Ok(frame)
    }

    /// SEND frame carrying `message` to `destination`.
    ///
    /// The caller's headers and body are kept; `destination` and
    /// `transaction` override any value the message already had.
    pub fn send_frame(&self, destination: &str, message: Frame, transaction: Option<&str>) -> Frame {
        let mut frame = message;
        frame.command = "SEND".to_string();
        frame.legacy_mode = frame.legacy_mode || self.version == Version::V1_0;
        frame.set("destination", Some(destination));
        if transaction.is_some() {
            frame.set("transaction", transaction);
        }
        frame
    }

    pub fn begin_frame(&self, transaction: Option<&str>) -> Frame {
        self.transaction_frame("BEGIN", transaction)
    }

    pub fn commit_frame(&self, transaction: Option<&str>) -> Frame {
        self.transaction_frame("COMMIT", transaction)
    }

    pub fn abort_frame(&self, transaction: Option<&str>) -> Frame {
        self.transaction_frame("ABORT", transaction)
    }

    fn transaction_frame(&self, command: &str, transaction: Option<&str>) -> Frame {
        let mut frame = self.create_frame(command);
        frame.set("transaction", transaction);
        frame
    }

    /// ACK frame acknowledging `message`.
    ///
    /// The acknowledged id is the message's `ack` header, falling back to
    /// its `message-id`. Callers holding a frame that may lack both should
    /// call [`Frame::ensure_message_id`] first.
    pub fn ack_frame(&self, message: &Frame, transaction: Option<&str>) -> Result<Frame, ProtocolError> {
        self.acknowledgement("ACK", message, transaction)
    }

    /// NACK frame rejecting `message`.
    ///
    /// NACK does not exist in STOMP 1.0. `requeue` is only understood by
    /// RabbitMQ; passing `Some(_)` to any other dialect is an error rather
    /// than a silently dropped hint.
    pub fn nack_frame(
        &self,
        message: &Frame,
        transaction: Option<&str>,
        requeue: Option<bool>,
    ) -> Result<Frame, ProtocolError> {
        if !self.has_version(Version::V1_1) {
            return Err(ProtocolError::NackUnsupported(self.version));
        }
        if requeue.is_some() && !self.dialect.supports_requeue() {
            return Err(ProtocolError::RequeueNotSupported(self.dialect));
        }
        let mut frame = self.acknowledgement("NACK", message, transaction)?;
        if let Some(requeue) = requeue {
            frame.set("requeue", Some(if requeue { "true" } else { "false" }));
        }
        Ok(frame)
    }

    fn acknowledgement(
        &self,
        command: &str,
        message: &Frame,
        transaction: Option<&str>,
    ) -> Result<Frame, ProtocolError> {
        let id = message
            .get_header("ack")
            .or_else(|| message.get_header("message-id"))
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingMessageId)?;

        let mut frame = self.create_frame(command);
        frame.set("transaction", transaction);
        if self.has_version(Version::V1_2) {
            frame.set("id", Some(id));
        } else {
            frame.set("message-id", Some(id));
            if self.has_version(Version::V1_1) || self.dialect.acks_need_subscription() {
                frame.set("subscription", message.get_header("subscription"));
            }
        }
        Ok(frame)
    }

    /// DISCONNECT frame.
    pub fn disconnect_frame(&self) -> Frame {
        let mut frame = self.create_frame("DISCONNECT");
        frame.set("client-id", self.client_id.as_deref());
        frame
    }
}
