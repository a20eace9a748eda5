//! fieldsync core - the client-side session and realtime synchronization layer.
//!
//! The crate is composed bottom-up:
//!
//! - [`auth`]: `SessionStore`, the single owner of the credential pair
//! - [`api`]: `RequestExecutor`, bearer injection with single-flight refresh-and-retry
//! - [`realtime`]: `RealtimeChannel`, a reconnecting WebSocket with topic subscriptions
//! - [`sync`]: `SyncController`, event-driven, coalesced re-fetching of named views
//!
//! [`cache`] and [`config`] carry the on-disk state shared by the front ends.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod realtime;
pub mod sync;

pub use api::{ApiClient, ApiError, RequestExecutor, RequestSpec};
pub use auth::{AuthStatus, Session, SessionStore};
pub use config::Config;
pub use realtime::{ChannelState, RealtimeChannel, Subscription};
pub use sync::{SyncController, SyncEvent, ViewSnapshot, ViewStatus};
