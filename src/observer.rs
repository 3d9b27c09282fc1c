use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::connection::ConnError;
use crate::frame::Frame;
use crate::transport::Transport;

/// Hooks a [`Connection`](crate::Connection) calls as traffic flows.
///
/// Observers see every real frame in both directions, heartbeat runs parsed
/// from the wire, and idle periods (a transport read that returned no
/// data). They get the transport so they can react, e.g. by writing a
/// heartbeat, but never alter frames. An error returned from a hook aborts
/// the connection operation that triggered it.
pub trait ConnectionObserver {
    fn frame_sent(
        &mut self,
        _frame: &Frame,
        _transport: &mut dyn Transport,
        _now: Instant,
    ) -> Result<(), ConnError> {
        Ok(())
    }

    fn frame_received(
        &mut self,
        _frame: &Frame,
        _transport: &mut dyn Transport,
        _now: Instant,
    ) -> Result<(), ConnError> {
        Ok(())
    }

    fn empty_line_received(&mut self, _now: Instant) {}

    fn idle(&mut self, _transport: &mut dyn Transport, _now: Instant) -> Result<(), ConnError> {
        Ok(())
    }
}

/// Shared handle, so the caller can keep inspecting an observer after
/// handing it to the connection.
impl<O: ConnectionObserver> ConnectionObserver for Arc<Mutex<O>> {
    fn frame_sent(
        &mut self,
        frame: &Frame,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        lock(self).frame_sent(frame, transport, now)
    }

    fn frame_received(
        &mut self,
        frame: &Frame,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        lock(self).frame_received(frame, transport, now)
    }

    fn empty_line_received(&mut self, now: Instant) {
        lock(self).empty_line_received(now)
    }

    fn idle(&mut self, transport: &mut dyn Transport, now: Instant) -> Result<(), ConnError> {
        lock(self).idle(transport, now)
    }
}

fn lock<O>(shared: &Arc<Mutex<O>>) -> std::sync::MutexGuard<'_, O> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Observers in registration order.
#[derive(Default)]
pub struct ObserverCollection {
    observers: Vec<Box<dyn ConnectionObserver>>,
}

impl ObserverCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: impl ConnectionObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub(crate) fn frame_sent(
        &mut self,
        frame: &Frame,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        self.observers
            .iter_mut()
            .try_for_each(|o| o.frame_sent(frame, transport, now))
    }

    pub(crate) fn frame_received(
        &mut self,
        frame: &Frame,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), ConnError> {
        self.observers
            .iter_mut()
            .try_for_each(|o| o.frame_received(frame, transport, now))
    }

    pub(crate) fn empty_line_received(&mut self, now: Instant) {
        for observer in &mut self.observers {
            observer.empty_line_received(now);
        }
    }

    pub(crate) fn idle(&mut self, transport: &mut dyn Transport, now: Instant) -> Result<(), ConnError> {
        self.observers
            .iter_mut()
            .try_for_each(|o| o.idle(transport, now))
    }
}

impl fmt::Debug for ObserverCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverCollection")
            .field("len", &self.observers.len())
            .finish()
    }
}
