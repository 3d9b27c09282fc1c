//! Client session: the legal order of STOMP operations.
//!
//! A [`Session`] wraps a connected [`Connection`] and the negotiated
//! [`Protocol`]. Its [`SessionState`] decides which calls are allowed:
//!
//! | State | subscribe | unsubscribe | begin | commit/abort | read |
//! |---|---|---|---|---|---|
//! | Producer | Consumer | illegal | ProducerTransaction | illegal | illegal |
//! | ProducerTransaction | ConsumerTransaction | illegal | illegal | Producer | illegal |
//! | Consumer | illegal | Producer when the last subscription goes | ConsumerTransaction | illegal | transport |
//! | ConsumerTransaction | illegal | ProducerTransaction when the last subscription goes | illegal | Consumer | transport |
//! | Draining | illegal | illegal | illegal | illegal | buffered frames, then Producer |
//!
//! `send`, `ack` and `nack` are always allowed and carry the active
//! transaction. Unsubscribing while frames are still buffered enters a
//! draining state so they can be read before the session reverts to
//! producing. An illegal call fails with [`StateError`] and changes nothing.

use std::fmt;
use std::mem;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::connection::{ConnError, ConnectOptions, Connection};
use crate::frame::Frame;
use crate::protocol::{AckMode, Protocol};
use crate::transport::Transport;

/// A call that the current session state does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{operation} is not allowed in the {state} state")]
    Illegal {
        operation: &'static str,
        state: &'static str,
    },
    #[error("no subscription with id '{0}'")]
    UnknownSubscription(String),
}

/// One active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub selector: Option<String>,
    pub ack: AckMode,
    pub durable: bool,
}

/// Optional settings for [`Session::subscribe_with_options`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Subscription id; generated per session when unset.
    pub id: Option<String>,
    pub selector: Option<String>,
    pub durable: bool,
    /// Extra SUBSCRIBE headers. Protocol and dialect headers take precedence.
    pub headers: Vec<(String, String)>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// The role a session is currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Producer,
    ProducerTransaction {
        transaction_id: String,
    },
    Consumer {
        subscriptions: Vec<Subscription>,
    },
    ConsumerTransaction {
        transaction_id: String,
        subscriptions: Vec<Subscription>,
    },
    /// Unsubscribed with frames still buffered.
    Draining {
        subscription: Subscription,
    },
    DrainingTransaction {
        transaction_id: String,
        subscription: Subscription,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Producer => "producer",
            SessionState::ProducerTransaction { .. } => "producer transaction",
            SessionState::Consumer { .. } => "consumer",
            SessionState::ConsumerTransaction { .. } => "consumer transaction",
            SessionState::Draining { .. } => "draining",
            SessionState::DrainingTransaction { .. } => "draining transaction",
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            SessionState::ProducerTransaction { transaction_id }
            | SessionState::ConsumerTransaction { transaction_id, .. }
            | SessionState::DrainingTransaction { transaction_id, .. } => {
                Some(transaction_id.as_str())
            }
            _ => None,
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        match self {
            SessionState::Consumer { subscriptions }
            | SessionState::ConsumerTransaction { subscriptions, .. } => subscriptions,
            _ => &[],
        }
    }

    fn illegal(&self, operation: &'static str) -> StateError {
        StateError::Illegal {
            operation,
            state: self.name(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A STOMP client session over one connection.
pub struct Session<T: Transport> {
    connection: Connection<T>,
    protocol: Protocol,
    state: SessionState,
    token: String,
    next_subscription: u64,
    next_transaction: u64,
}

impl<T: Transport> Session<T> {
    /// Wrap an already connected connection.
    pub fn new(connection: Connection<T>, protocol: Protocol) -> Self {
        Self {
            connection,
            protocol,
            state: SessionState::Producer,
            token: format!("{:08x}", rand::random::<u32>()),
            next_subscription: 0,
            next_transaction: 0,
        }
    }

    /// Connect over `transport` and start a session.
    pub fn connect(transport: T, options: &ConnectOptions) -> Result<Self, ConnError> {
        Self::open(Connection::new(transport), options)
    }

    /// Connect a prepared connection, e.g. one with heartbeat observers
    /// already attached, and start a session.
    pub fn open(mut connection: Connection<T>, options: &ConnectOptions) -> Result<Self, ConnError> {
        let protocol = connection.connect(options)?;
        Ok(Self::new(connection, protocol))
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.state.transaction_id()
    }

    pub fn current_subscriptions(&self) -> &[Subscription] {
        self.state.subscriptions()
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    /// Subscribe to `destination` and become a consumer. Returns the
    /// subscription id.
    pub fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<String, ConnError> {
        self.subscribe_with_options(destination, ack, SubscriptionOptions::default())
    }

    pub fn subscribe_with_options(
        &mut self,
        destination: &str,
        ack: AckMode,
        options: SubscriptionOptions,
    ) -> Result<String, ConnError> {
        if !matches!(
            self.state,
            SessionState::Producer | SessionState::ProducerTransaction { .. }
        ) {
            return Err(self.state.illegal("subscribe").into());
        }

        let id = match options.id {
            Some(id) => id,
            None => {
                self.next_subscription += 1;
                format!("sub-{}", self.next_subscription)
            }
        };
        let mut frame = self.protocol.subscribe_frame(
            destination,
            Some(&id),
            ack,
            options.selector.as_deref(),
            options.durable,
        )?;
        for (key, value) in options.headers {
            if !frame.has_header(&key) {
                frame.headers.push((key, value));
            }
        }
        self.connection.write_frame(&frame)?;

        let subscription = Subscription {
            id: id.clone(),
            destination: destination.to_string(),
            selector: options.selector,
            ack,
            durable: options.durable,
        };
        self.replace_state("subscribe", |state| match state {
            SessionState::ProducerTransaction { transaction_id } => {
                SessionState::ConsumerTransaction {
                    transaction_id,
                    subscriptions: vec![subscription],
                }
            }
            _ => SessionState::Consumer {
                subscriptions: vec![subscription],
            },
        });
        Ok(id)
    }

    /// Remove a subscription; `None` picks the most recent one.
    pub fn unsubscribe(&mut self, id: Option<&str>) -> Result<(), ConnError> {
        let subscriptions = match &self.state {
            SessionState::Consumer { subscriptions }
            | SessionState::ConsumerTransaction { subscriptions, .. } => subscriptions,
            other => return Err(other.illegal("unsubscribe").into()),
        };
        let index = match id {
            Some(id) => subscriptions
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| StateError::UnknownSubscription(id.to_string()))?,
            None => subscriptions.len().saturating_sub(1),
        };
        let last = subscriptions.len() == 1;
        let target = &subscriptions[index];
        let frame = self.protocol.unsubscribe_frame(
            &target.destination,
            Some(&target.id),
            target.durable,
        )?;
        let draining = last && self.connection.has_buffered_frames()?;
        self.connection.write_frame(&frame)?;

        if !last {
            if let SessionState::Consumer { subscriptions }
            | SessionState::ConsumerTransaction { subscriptions, .. } = &mut self.state
            {
                subscriptions.remove(index);
            }
            return Ok(());
        }

        self.replace_state("unsubscribe", |state| match state {
            SessionState::ConsumerTransaction {
                transaction_id,
                mut subscriptions,
            } => {
                let subscription = subscriptions.remove(index);
                if draining {
                    SessionState::DrainingTransaction {
                        transaction_id,
                        subscription,
                    }
                } else {
                    SessionState::ProducerTransaction { transaction_id }
                }
            }
            SessionState::Consumer { mut subscriptions } if draining => {
                SessionState::Draining {
                    subscription: subscriptions.remove(index),
                }
            }
            _ => SessionState::Producer,
        });
        Ok(())
    }

    /// Start a transaction. Transaction ids are never reused within a
    /// session.
    pub fn begin(&mut self) -> Result<String, ConnError> {
        if !matches!(
            self.state,
            SessionState::Producer | SessionState::Consumer { .. }
        ) {
            return Err(self.state.illegal("begin").into());
        }
        self.next_transaction += 1;
        let transaction_id = format!("{}-tx-{}", self.token, self.next_transaction);
        self.connection
            .write_frame(&self.protocol.begin_frame(Some(&transaction_id)))?;

        let id = transaction_id.clone();
        self.replace_state("begin", |state| match state {
            SessionState::Consumer { subscriptions } => SessionState::ConsumerTransaction {
                transaction_id: id,
                subscriptions,
            },
            _ => SessionState::ProducerTransaction { transaction_id: id },
        });
        Ok(transaction_id)
    }

    pub fn commit(&mut self) -> Result<(), ConnError> {
        self.finish_transaction("commit")
    }

    pub fn abort(&mut self) -> Result<(), ConnError> {
        self.finish_transaction("abort")
    }

    fn finish_transaction(&mut self, operation: &'static str) -> Result<(), ConnError> {
        let transaction_id = match &self.state {
            SessionState::ProducerTransaction { transaction_id }
            | SessionState::ConsumerTransaction { transaction_id, .. } => transaction_id.as_str(),
            other => return Err(other.illegal(operation).into()),
        };
        let frame = if operation == "commit" {
            self.protocol.commit_frame(Some(transaction_id))
        } else {
            self.protocol.abort_frame(Some(transaction_id))
        };
        self.connection.write_frame(&frame)?;

        self.replace_state(operation, |state| match state {
            SessionState::ConsumerTransaction { subscriptions, .. } => {
                SessionState::Consumer { subscriptions }
            }
            _ => SessionState::Producer,
        });
        Ok(())
    }

    /// Send `message` to `destination`, inside the active transaction if
    /// there is one.
    pub fn send(&mut self, destination: &str, message: Frame) -> Result<(), ConnError> {
        let frame = self
            .protocol
            .send_frame(destination, message, self.state.transaction_id());
        self.connection.write_frame(&frame)
    }

    /// Acknowledge a received message. A message id is assigned first when
    /// the frame has none.
    pub fn ack(&mut self, message: &mut Frame) -> Result<(), ConnError> {
        message.ensure_message_id();
        let frame = self
            .protocol
            .ack_frame(message, self.state.transaction_id())?;
        self.connection.write_frame(&frame)
    }

    /// Reject a received message. `requeue` is only accepted by brokers
    /// that support it.
    pub fn nack(&mut self, message: &mut Frame, requeue: Option<bool>) -> Result<(), ConnError> {
        message.ensure_message_id();
        let frame = self
            .protocol
            .nack_frame(message, self.state.transaction_id(), requeue)?;
        self.connection.write_frame(&frame)
    }

    /// Next incoming frame.
    ///
    /// Consumers read from the connection; `Ok(None)` means nothing arrived
    /// yet. A draining session hands out what is still buffered and then
    /// reverts to producing.
    pub fn read(&mut self) -> Result<Option<Frame>, ConnError> {
        match &self.state {
            SessionState::Consumer { .. } | SessionState::ConsumerTransaction { .. } => {
                return self.connection.read_frame();
            }
            SessionState::Draining { .. } | SessionState::DrainingTransaction { .. } => {}
            other => return Err(other.illegal("read").into()),
        }

        // A buffered ERROR comes back as Err here and still counts as
        // drained.
        let next = if self.connection.has_buffered_frames()? {
            self.connection.read_frame()
        } else {
            Ok(None)
        };
        match self.connection.has_buffered_frames() {
            Ok(true) => {}
            Ok(false) => self.replace_state("read", |state| match state {
                SessionState::DrainingTransaction { transaction_id, .. } => {
                    SessionState::ProducerTransaction { transaction_id }
                }
                _ => SessionState::Producer,
            }),
            // The unread frame stays stashed for the next call.
            Err(e) => debug!(error = %e, "backlog check failed while draining"),
        }
        next
    }

    /// Send DISCONNECT and hand back the connection.
    pub fn disconnect(
        mut self,
        receipt_timeout: Option<Duration>,
    ) -> Result<Connection<T>, ConnError> {
        self.connection.disconnect(&self.protocol, receipt_timeout)?;
        Ok(self.connection)
    }

    fn replace_state(
        &mut self,
        operation: &'static str,
        next: impl FnOnce(SessionState) -> SessionState,
    ) {
        let previous = mem::replace(&mut self.state, SessionState::Producer);
        let from = previous.name();
        self.state = next(previous);
        debug!(operation, from, to = self.state.name(), "session state changed");
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .finish()
    }
}
