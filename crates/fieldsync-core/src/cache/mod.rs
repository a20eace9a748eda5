//! Local view cache.
//!
//! `ViewCache` stores the last successful payload of each view as JSON so
//! the front ends have something to show before the first fetch completes.
//! Entries are considered stale after 15 minutes.

pub mod manager;

pub use manager::{CachedData, ViewCache};
