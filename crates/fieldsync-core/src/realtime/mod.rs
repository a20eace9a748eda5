//! Realtime push channel.
//!
//! - `RealtimeChannel`: one WebSocket shared by every topic, with reconnect and liveness
//! - `ServerEvent` / `ClientMessage`: the JSON frames on the wire
//! - `ReconnectPolicy`: exponential backoff between connection attempts

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod message;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::{ChannelConfig, ChannelState, RealtimeChannel, Subscription};
pub use connector::{ChannelError, Connector, Link, WsConnector};
pub use message::{ClientMessage, EventKind, ServerEvent};
