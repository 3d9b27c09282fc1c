//! Synchronous STOMP 1.0-1.2 client engine.
//!
//! Frames and their wire encoding live in [`frame`], the incremental
//! decoder in [`parser`], version and broker specific frame construction in
//! [`protocol`], liveness in [`heartbeat`], and the legal order of client
//! operations in [`session`]. The engine drives a caller supplied
//! [`Transport`] and never blocks on its own.

pub mod codec;
pub mod connection;
pub mod frame;
pub mod heartbeat;
pub mod observer;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod transport;

pub use codec::{StompCodec, StompItem};
pub use connection::{ConnError, ConnectOptions, Connection, DEFAULT_HEARTBEAT, NO_HEARTBEAT};
pub use frame::{Frame, ServerError};
pub use heartbeat::{
    Heartbeat, HeartbeatEmitter, HeartbeatError, LivenessDetector, negotiate_heartbeats,
    parse_heartbeat_header,
};
pub use observer::{ConnectionObserver, ObserverCollection};
pub use parser::{ParseEvent, Parser, ParserMode};
pub use protocol::{AckMode, Dialect, Protocol, ProtocolError, Version};
pub use session::{Session, SessionState, StateError, Subscription, SubscriptionOptions};
pub use transport::{Clock, ManualClock, SystemClock, Transport};
