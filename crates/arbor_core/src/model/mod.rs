//! Domain model for the item forest.
//!
//! # Responsibility
//! - Define items, grants, flags and the path codec shared by all layers.
//!
//! # Invariants
//! - Every node is identified by a stable `ItemId` and addressed by an
//!   `ItemPath` that ends with that id.
//! - Grants and flags reference items by path value, never by id.

pub mod actor;
pub mod item;
pub mod membership;
pub mod path;
pub mod visibility;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
