//! Shared helpers for integration tests: a scripted in-memory transport and
//! a connection factory driven by a manual clock.

#![allow(dead_code)]

use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use stomp_engine::{Connection, ManualClock, Transport};

/// Reads pop queued chunks (an empty queue reads as "no data"), writes are
/// recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub incoming: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub read_timeout: Duration,
    pub closed: bool,
    pub fail_writes: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, bytes: &[u8]) -> Self {
        self.push(bytes);
        self
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.incoming.push_back(bytes.to_vec());
    }

    /// Everything written so far, lossily decoded.
    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// Number of bare heartbeat bytes written outside of frames.
    pub fn heartbeats_written(&self) -> usize {
        let mut in_frame = false;
        let mut beats = 0;
        for &b in &self.written {
            match (in_frame, b) {
                (false, b'\n') => beats += 1,
                (false, _) => in_frame = true,
                (true, 0) => in_frame = false,
                (true, _) => {}
            }
        }
        beats
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, max_bytes: usize) -> io::Result<Bytes> {
        match self.incoming.pop_front() {
            Some(mut chunk) if chunk.len() > max_bytes => {
                let rest = chunk.split_off(max_bytes);
                self.incoming.push_front(rest);
                Ok(Bytes::from(chunk))
            }
            Some(chunk) => Ok(Bytes::from(chunk)),
            None => Ok(Bytes::new()),
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

/// A connection over `transport` whose clock advances `step` per reading.
pub fn connection(
    transport: ScriptedTransport,
    step: Duration,
) -> (Connection<ScriptedTransport>, ManualClock) {
    let clock = ManualClock::new().with_step(step);
    (Connection::new(transport).with_clock(clock.clone()), clock)
}

/// Bytes of a CONNECTED frame for `version` with optional extra headers.
pub fn connected(version: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let mut out = format!("CONNECTED\nversion:{version}\n");
    for (k, v) in extra {
        out.push_str(&format!("{k}:{v}\n"));
    }
    out.push_str("\n\0");
    out.into_bytes()
}
