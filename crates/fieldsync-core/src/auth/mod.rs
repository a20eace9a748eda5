//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `Session`: the access/refresh credential pair, with expiry read from the JWT
//! - `SessionStore`: the shared, persisted owner of the current session
//! - `SessionStorage`: durable backends (JSON file, OS keychain, memory)
//!
//! Sessions survive restarts through the configured storage backend.

pub mod credentials;
pub mod session;
pub mod storage;
pub mod store;

pub use credentials::KeyringSessionStorage;
pub use session::Session;
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage, StorageError};
pub use store::{AuthStatus, SessionStore};
