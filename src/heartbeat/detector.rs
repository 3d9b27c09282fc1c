use std::time::{Duration, Instant};
use tracing::warn;

use super::{Heartbeat, HeartbeatError, HeartbeatState};
use crate::connection::ConnError;
use crate::frame::Frame;
use crate::observer::ConnectionObserver;
use crate::transport::Transport;

/// Default tolerance applied to the server's promised send interval.
pub const DEFAULT_DETECT_FACTOR: f64 = 1.5;

/// Declares the server dead after `factor × max(client receive, server
/// send)` without any incoming traffic. Frames and heartbeat runs both
/// count.
#[derive(Debug, Clone)]
pub struct LivenessDetector {
    state: HeartbeatState,
    factor: f64,
}

impl Default for LivenessDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessDetector {
    pub fn new() -> Self {
        Self {
            state: HeartbeatState::default(),
            factor: DEFAULT_DETECT_FACTOR,
        }
    }

    /// Override the tolerance factor; clamped to `[1.0, 5.0]`.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.clamp(1.0, 5.0);
        self
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn is_enabled(&self) -> bool {
        self.state.interval().is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.state.interval()
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.state.last_activity()
    }

    pub fn client_heartbeat(&self) -> Option<Heartbeat> {
        self.state.client()
    }

    pub fn server_heartbeat(&self) -> Option<Heartbeat> {
        self.state.server()
    }
}

impl ConnectionObserver for LivenessDetector {
    fn frame_sent(
        &mut self,
        frame: &Frame,
        _transport: &mut dyn Transport,
        _now: Instant,
    ) -> Result<(), ConnError> {
        if frame.command == "CONNECT" {
            self.state.offer(frame);
        }
        Ok(())
    }

    fn frame_received(
        &mut self,
        frame: &Frame,
        _transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        if frame.command == "CONNECTED" {
            self.state.answer(frame, self.factor, now, |client, server| {
                (client.receive_ms, server.send_ms)
            });
        } else {
            self.state.remember_activity(now);
        }
        Ok(())
    }

    fn empty_line_received(&mut self, now: Instant) {
        self.state.remember_activity(now);
    }

    fn idle(&mut self, _transport: &mut dyn Transport, now: Instant) -> Result<(), ConnError> {
        if let Some((idle, interval)) = self.state.overdue(now) {
            warn!(?idle, ?interval, "server heartbeat overdue");
            return Err(HeartbeatError::PeerDead { idle, interval }.into());
        }
        Ok(())
    }
}
