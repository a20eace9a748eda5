//! View synchronization.
//!
//! `SyncController` keeps named views fresh by re-fetching them when the
//! realtime channel reports activity on a topic they depend on.

pub mod controller;
pub mod view;

pub use controller::{RetryHandle, SyncController, SyncError, SyncEvent};
pub use view::{ViewSnapshot, ViewSpec, ViewStatus};
