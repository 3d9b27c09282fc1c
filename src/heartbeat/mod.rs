//! Heartbeat negotiation and the two liveness strategies.
//!
//! [`HeartbeatEmitter`] keeps the server convinced we are alive by writing
//! a bare newline when we have been quiet for too long.
//! [`LivenessDetector`] watches the other direction and reports the server
//! as dead when it stops sending anything. Both are connection observers:
//! they learn the negotiated intervals from the CONNECT and CONNECTED frames
//! passing through the connection and never touch frame content.

mod detector;
mod emitter;

pub use detector::LivenessDetector;
pub use emitter::HeartbeatEmitter;

use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;

/// Liveness and heartbeat configuration failures.
#[derive(Error, Debug)]
pub enum HeartbeatError {
    /// Nothing arrived from the server within the tolerated interval.
    #[error("server heartbeat missed: idle for {idle:?}, tolerated {interval:?}")]
    PeerDead { idle: Duration, interval: Duration },
    /// Writing a heartbeat to the transport failed.
    #[error("failed to send heartbeat: {0}")]
    BeatFailed(#[source] io::Error),
    /// A blocking read could outlast the send interval, so beats would be
    /// late.
    #[error("transport read timeout {read_timeout:?} exceeds heartbeat send interval {interval:?}")]
    ReadTimeoutTooLarge {
        read_timeout: Duration,
        interval: Duration,
    },
}

/// Heartbeat intervals for one side of the connection, in milliseconds.
///
/// `send_ms` is how often that side promises to send something,
/// `receive_ms` how often it wants to receive something. Zero disables a
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    /// `0,0`: no heartbeats in either direction.
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// The same interval in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self::new(ms, ms)
    }

    /// Read a `heart-beat` header value; missing or invalid parts are zero.
    pub fn from_header(header: &str) -> Self {
        let (send_ms, receive_ms) = parse_heartbeat_header(header);
        Self::new(send_ms, receive_ms)
    }

    /// The heart-beat advertised by a CONNECT or CONNECTED frame; an absent
    /// header means `0,0`.
    pub fn from_frame(frame: &Frame) -> Self {
        frame
            .get_header("heart-beat")
            .map(Self::from_header)
            .unwrap_or_else(Self::disabled)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(10000, 10000)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Returns `(outgoing, incoming)` where each element is `Some(Duration)` if
/// heartbeats are enabled in that direction, or `None` if disabled. A
/// direction is enabled only when both sides asked for it; the interval is
/// the larger of the two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let agree = |ours: u64, theirs: u64| {
        (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)))
    };
    (agree(client_out, server_in), agree(client_in, server_out))
}

/// State shared by both strategies: the two advertised heart-beats, the
/// derived interval once enabled, and the last time activity was seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeartbeatState {
    client: Option<Heartbeat>,
    server: Option<Heartbeat>,
    interval: Option<Duration>,
    last_activity: Option<Instant>,
}

impl HeartbeatState {
    /// Record the client's offer from an outgoing CONNECT. A new CONNECT
    /// starts negotiation over.
    pub(crate) fn offer(&mut self, connect: &Frame) {
        *self = Self {
            client: Some(Heartbeat::from_frame(connect)),
            ..Self::default()
        };
    }

    /// Record the server's answer from CONNECTED and enable the strategy
    /// when both relevant intervals are non-zero. `pick` chooses the
    /// (client, server) values the strategy cares about.
    pub(crate) fn answer(
        &mut self,
        connected: &Frame,
        factor: f64,
        now: Instant,
        pick: impl Fn(Heartbeat, Heartbeat) -> (u64, u64),
    ) -> Option<Duration> {
        let server = Heartbeat::from_frame(connected);
        self.server = Some(server);
        let client = self.client?;
        let (ours, theirs) = pick(client, server);
        if ours == 0 || theirs == 0 {
            debug!(%client, %server, "heartbeat direction disabled");
            return None;
        }
        let interval = scaled(ours.max(theirs), factor);
        self.interval = Some(interval);
        self.last_activity = Some(now);
        debug!(%client, %server, ?interval, "heartbeat enabled");
        Some(interval)
    }

    pub(crate) fn remember_activity(&mut self, now: Instant) {
        if self.interval.is_some() {
            self.last_activity = Some(now);
        }
    }

    pub(crate) fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub(crate) fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub(crate) fn client(&self) -> Option<Heartbeat> {
        self.client
    }

    pub(crate) fn server(&self) -> Option<Heartbeat> {
        self.server
    }

    /// Idle time when it has reached the interval, otherwise `None`.
    pub(crate) fn overdue(&self, now: Instant) -> Option<(Duration, Duration)> {
        let interval = self.interval?;
        let idle = now.saturating_duration_since(self.last_activity?);
        (idle >= interval).then_some((idle, interval))
    }
}

fn scaled(ms: u64, factor: f64) -> Duration {
    Duration::from_micros((ms as f64 * 1000.0 * factor).round() as u64)
}
