use std::time::{Duration, Instant};
use tracing::trace;

use super::{Heartbeat, HeartbeatError, HeartbeatState};
use crate::connection::ConnError;
use crate::frame::Frame;
use crate::observer::ConnectionObserver;
use crate::transport::Transport;

/// Default fraction of the negotiated interval after which a beat is sent.
pub const DEFAULT_EMIT_FACTOR: f64 = 0.65;

/// Sends a heartbeat whenever the client has been quiet for
/// `factor × max(client send, server receive)`.
///
/// Enabled only when both the CONNECT send value and the CONNECTED receive
/// value are non-zero. Every outgoing frame counts as activity.
#[derive(Debug, Clone)]
pub struct HeartbeatEmitter {
    state: HeartbeatState,
    factor: f64,
    beats: u64,
}

impl Default for HeartbeatEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatEmitter {
    pub fn new() -> Self {
        Self {
            state: HeartbeatState::default(),
            factor: DEFAULT_EMIT_FACTOR,
            beats: 0,
        }
    }

    /// Override the send factor, clamped to `[0.05, 0.95]`.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.clamp(0.05, 0.95);
        self
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn is_enabled(&self) -> bool {
        self.state.interval().is_some()
    }

    /// Time of silence after which a beat goes out.
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

    pub fn beats_sent(&self) -> u64 {
        self.beats
    }

    fn beat_if_due(&mut self, transport: &mut dyn Transport, now: Instant) -> Result<(), ConnError> {
        let Some((idle, interval)) = self.state.overdue(now) else {
            return Ok(());
        };
        transport
            .send_alive(interval)
            .map_err(HeartbeatError::BeatFailed)?;
        self.beats += 1;
        self.state.remember_activity(now);
        trace!(?idle, ?interval, beats = self.beats, "heartbeat sent");
        Ok(())
    }
}

impl ConnectionObserver for HeartbeatEmitter {
    fn frame_sent(
        &mut self,
        frame: &Frame,
        _transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        if frame.command == "CONNECT" {
            self.state.offer(frame);
        } else {
            self.state.remember_activity(now);
        }
        Ok(())
    }

    fn frame_received(
        &mut self,
        frame: &Frame,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        if frame.command == "CONNECTED" {
            let enabled = self.state.answer(frame, self.factor, now, |client, server| {
                (client.send_ms, server.receive_ms)
            });
            if let Some(interval) = enabled {
                let read_timeout = transport.read_timeout();
                if read_timeout > interval {
                    return Err(HeartbeatError::ReadTimeoutTooLarge {
                        read_timeout,
                        interval,
                    }
                    .into());
                }
            }
        }
        self.beat_if_due(transport, now)
    }

    fn idle(&mut self, transport: &mut dyn Transport, now: Instant) -> Result<(), ConnError> {
        self.beat_if_due(transport, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn negotiated(client: &str, server: &str, now: Instant) -> (HeartbeatEmitter, MockTransport) {
        let mut emitter = HeartbeatEmitter::new();
        let mut transport = MockTransport::default();
        let connect = Frame::new("CONNECT").header("heart-beat", client);
        let connected = Frame::new("CONNECTED").header("heart-beat", server);
        emitter.frame_sent(&connect, &mut transport, now).unwrap();
        emitter
            .frame_received(&connected, &mut transport, now)
            .unwrap();
        (emitter, transport)
    }

    #[test]
    fn beats_once_after_interval() {
        let start = Instant::now();
        let (mut emitter, mut transport) = negotiated("100,0", "0,100", start);
        assert_eq!(emitter.interval(), Some(Duration::from_millis(65)));

        emitter
            .idle(&mut transport, start + Duration::from_millis(64))
            .unwrap();
        assert_eq!(emitter.beats_sent(), 0);

        emitter
            .idle(&mut transport, start + Duration::from_millis(65))
            .unwrap();
        emitter
            .idle(&mut transport, start + Duration::from_millis(70))
            .unwrap();
        assert_eq!(emitter.beats_sent(), 1);
        assert_eq!(transport.written, b"\n");
    }

    #[test]
    fn outgoing_frames_postpone_beat() {
        let start = Instant::now();
        let (mut emitter, mut transport) = negotiated("100,0", "0,100", start);
        emitter
            .frame_sent(
                &Frame::new("SEND"),
                &mut transport,
                start + Duration::from_millis(50),
            )
            .unwrap();
        emitter
            .idle(&mut transport, start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(emitter.beats_sent(), 0);
    }

    #[test]
    fn disabled_when_either_side_is_zero() {
        let (emitter, _) = negotiated("100,0", "0,0", Instant::now());
        assert!(!emitter.is_enabled());
        let (emitter, _) = negotiated("0,0", "0,100", Instant::now());
        assert!(!emitter.is_enabled());
    }

    #[test]
    fn rejects_read_timeout_longer_than_interval() {
        let now = Instant::now();
        let mut emitter = HeartbeatEmitter::new();
        let mut transport = MockTransport {
            read_timeout: Duration::from_secs(1),
            ..MockTransport::default()
        };
        emitter
            .frame_sent(
                &Frame::new("CONNECT").header("heart-beat", "100,0"),
                &mut transport,
                now,
            )
            .unwrap();
        let err = emitter
            .frame_received(
                &Frame::new("CONNECTED").header("heart-beat", "0,100"),
                &mut transport,
                now,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConnError::Heartbeat(HeartbeatError::ReadTimeoutTooLarge { .. })
        ));
    }

    #[test]
    fn factor_is_clamped() {
        assert_eq!(HeartbeatEmitter::new().with_factor(2.0).factor(), 0.95);
        assert_eq!(HeartbeatEmitter::new().with_factor(0.0).factor(), 0.05);
    }
}
